//! Logical topic contract shared by vehicles, clients and the broker router.

/// vehicle → broker, once per vehicle start
pub const VEHICLE_REGISTER_TEMPLATE: &str = "vc/vehicle/{vehicle_id}/register/request";
/// broker → one vehicle
pub const JOB_ASSIGN_TEMPLATE: &str = "vc/vehicle/{vehicle_id}/job/assign";
/// client → broker
pub const JOB_SUBMIT_TEMPLATE: &str = "vc/client/{client_id}/job/submit";
/// vehicle → one client (observed by the broker as well)
pub const JOB_RESULT_TEMPLATE: &str = "vc/client/{client_id}/job/result";

pub const VEHICLE_REGISTER_FILTER: &str = "vc/vehicle/+/register/request";
pub const JOB_SUBMIT_FILTER: &str = "vc/client/+/job/submit";
pub const JOB_RESULT_FILTER: &str = "vc/client/+/job/result";

pub fn vehicle_register(vehicle_id: &str) -> String {
    VEHICLE_REGISTER_TEMPLATE.replace("{vehicle_id}", vehicle_id)
}

pub fn job_assign(vehicle_id: &str) -> String {
    JOB_ASSIGN_TEMPLATE.replace("{vehicle_id}", vehicle_id)
}

pub fn job_submit(client_id: &str) -> String {
    JOB_SUBMIT_TEMPLATE.replace("{client_id}", client_id)
}

pub fn job_result(client_id: &str) -> String {
    JOB_RESULT_TEMPLATE.replace("{client_id}", client_id)
}

/// A concrete topic classified into its category.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TopicKind {
    RegisterRequest { vehicle_id: String },
    JobAssign { vehicle_id: String },
    JobSubmit { client_id: String },
    JobResult { client_id: String },
}

impl TopicKind {
    pub fn parse(topic: &str) -> Option<Self> {
        let levels: Vec<&str> = topic.split('/').collect();
        match levels.as_slice() {
            ["vc", "vehicle", id, "register", "request"] if !id.is_empty() => {
                Some(TopicKind::RegisterRequest {
                    vehicle_id: id.to_string(),
                })
            }
            ["vc", "vehicle", id, "job", "assign"] if !id.is_empty() => Some(TopicKind::JobAssign {
                vehicle_id: id.to_string(),
            }),
            ["vc", "client", id, "job", "submit"] if !id.is_empty() => Some(TopicKind::JobSubmit {
                client_id: id.to_string(),
            }),
            ["vc", "client", id, "job", "result"] if !id.is_empty() => Some(TopicKind::JobResult {
                client_id: id.to_string(),
            }),
            _ => None,
        }
    }
}

/// MQTT-style filter matching: `+` matches one level, a trailing `#` matches
/// the remaining levels (including none).
pub fn matches_filter(filter: &str, topic: &str) -> bool {
    let mut filter_levels = filter.split('/');
    let mut topic_levels = topic.split('/');

    loop {
        match (filter_levels.next(), topic_levels.next()) {
            (Some("#"), _) => return filter_levels.next().is_none(),
            (Some("+"), Some(_)) => continue,
            (Some(f), Some(t)) if f == t => continue,
            (None, None) => return true,
            _ => return false,
        }
    }
}
