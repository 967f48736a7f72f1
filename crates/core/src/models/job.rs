use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::errors::DispatchError;

/// A job as submitted by a client and forwarded by the engine.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Job {
    pub job_id: String,
    pub client_id: String,
    pub function: String,
    #[serde(default)]
    pub args: Vec<Value>,
}

/// Caller-side description of a job before it is stamped with its owner.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct JobSubmission {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub job_id: Option<String>,
    pub function: String,
    #[serde(default)]
    pub args: Vec<Value>,
}

impl JobSubmission {
    pub fn new(function: impl Into<String>, args: Vec<Value>) -> Self {
        Self {
            job_id: None,
            function: function.into(),
            args,
        }
    }

    pub fn with_job_id(mut self, job_id: impl Into<String>) -> Self {
        self.job_id = Some(job_id.into());
        self
    }

    /// Turns the submission into a [`Job`] owned by `client_id`, generating
    /// a UUID v4 job id when none was supplied.
    pub fn into_job(self, client_id: &str) -> Job {
        Job {
            job_id: self.job_id.unwrap_or_else(|| Uuid::new_v4().to_string()),
            client_id: client_id.to_string(),
            function: self.function,
            args: self.args,
        }
    }
}

/// Inbound view of an assignment on a vehicle.
///
/// Only the correlation ids are typed. `function` and `args` stay raw so
/// that a wrongly typed field fails the job (and is reported back to the
/// client) instead of failing the decode.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct AssignedJob {
    #[serde(default, deserialize_with = "lenient_id")]
    pub job_id: Option<String>,
    #[serde(default, deserialize_with = "lenient_id")]
    pub client_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub function: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub args: Option<Value>,
}

impl AssignedJob {
    /// Name of the function to run.
    pub fn function_name(&self) -> Result<&str, DispatchError> {
        match &self.function {
            None | Some(Value::Null) => Err(DispatchError::MissingFunction),
            Some(Value::String(name)) => Ok(name.as_str()),
            Some(other) => Err(DispatchError::Failed(format!(
                "function name must be a string, got {other}"
            ))),
        }
    }

    /// Positional arguments; a missing or null `args` means none.
    pub fn arg_list(&self, function: &str) -> Result<Vec<Value>, DispatchError> {
        match &self.args {
            None | Some(Value::Null) => Ok(Vec::new()),
            Some(Value::Array(args)) => Ok(args.clone()),
            Some(other) => Err(DispatchError::invalid_arguments(
                function,
                format!("expected an argument list, got {other}"),
            )),
        }
    }
}

impl From<Job> for AssignedJob {
    fn from(job: Job) -> Self {
        Self {
            job_id: Some(job.job_id),
            client_id: Some(job.client_id),
            function: Some(Value::String(job.function)),
            args: Some(Value::Array(job.args)),
        }
    }
}

/// Strings are kept, numbers are stringified, anything else counts as absent.
fn lenient_id<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match Value::deserialize(deserializer)? {
        Value::String(id) => Some(id),
        Value::Number(id) => Some(id.to_string()),
        _ => None,
    })
}

/// Either the value a job produced or a description of why it failed.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "lowercase")]
pub enum JobOutcome {
    Result(Value),
    Error(String),
}

/// Result of one job execution, correlated to its [`Job`] through `job_id`.
///
/// Serialized flat: `{"job_id", "vehicle_id", "result"}` on success or
/// `{"job_id", "vehicle_id", "error"}` on failure.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct JobResult {
    pub job_id: String,
    pub vehicle_id: String,
    #[serde(flatten)]
    pub outcome: JobOutcome,
}

impl JobResult {
    pub fn success(job_id: impl Into<String>, vehicle_id: impl Into<String>, value: Value) -> Self {
        Self {
            job_id: job_id.into(),
            vehicle_id: vehicle_id.into(),
            outcome: JobOutcome::Result(value),
        }
    }

    pub fn failure(
        job_id: impl Into<String>,
        vehicle_id: impl Into<String>,
        error: impl Into<String>,
    ) -> Self {
        Self {
            job_id: job_id.into(),
            vehicle_id: vehicle_id.into(),
            outcome: JobOutcome::Error(error.into()),
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self.outcome, JobOutcome::Result(_))
    }

    pub fn value(&self) -> Option<&Value> {
        match &self.outcome {
            JobOutcome::Result(value) => Some(value),
            JobOutcome::Error(_) => None,
        }
    }

    pub fn error(&self) -> Option<&str> {
        match &self.outcome {
            JobOutcome::Result(_) => None,
            JobOutcome::Error(error) => Some(error),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_submission_generates_job_id() {
        let job = JobSubmission::new("add", vec![json!(2), json!(3)]).into_job("c1");
        assert_eq!(job.client_id, "c1");
        assert_eq!(job.function, "add");
        assert!(Uuid::parse_str(&job.job_id).is_ok());
    }

    #[test]
    fn test_submission_keeps_explicit_job_id() {
        let job = JobSubmission::new("echo", vec![])
            .with_job_id("job-7")
            .into_job("c2");
        assert_eq!(job.job_id, "job-7");
    }

    #[test]
    fn test_result_wire_format_is_flat() {
        let ok = JobResult::success("j1", "veh1", json!(5));
        assert_eq!(
            serde_json::to_value(&ok).unwrap(),
            json!({"job_id": "j1", "vehicle_id": "veh1", "result": 5})
        );

        let failed = JobResult::failure("j2", "veh1", "Error executing job: boom");
        assert_eq!(
            serde_json::to_value(&failed).unwrap(),
            json!({"job_id": "j2", "vehicle_id": "veh1", "error": "Error executing job: boom"})
        );
    }

    #[test]
    fn test_result_decodes_error_variant() {
        let result: JobResult = serde_json::from_value(json!({
            "job_id": "j3",
            "vehicle_id": "veh2",
            "error": "unknown function 'nope'"
        }))
        .unwrap();
        assert!(!result.is_success());
        assert_eq!(result.error(), Some("unknown function 'nope'"));
        assert_eq!(result.value(), None);
    }

    #[test]
    fn test_result_without_outcome_is_rejected() {
        let decoded = serde_json::from_value::<JobResult>(json!({
            "job_id": "j4",
            "vehicle_id": "veh2"
        }));
        assert!(decoded.is_err());
    }

    #[test]
    fn test_assigned_job_tolerates_missing_fields() {
        let job: AssignedJob = serde_json::from_value(json!({"function": "add"})).unwrap();
        assert_eq!(job.job_id, None);
        assert_eq!(job.client_id, None);
        assert_eq!(job.arg_list("add"), Ok(vec![]));
    }

    #[test]
    fn test_assigned_job_keeps_wrongly_typed_fields() {
        let job: AssignedJob = serde_json::from_value(json!({
            "job_id": "j1",
            "client_id": "c1",
            "function": 7,
            "args": 5
        }))
        .unwrap();
        assert_eq!(job.job_id.as_deref(), Some("j1"));
        assert_eq!(job.client_id.as_deref(), Some("c1"));
        assert!(matches!(job.function_name(), Err(DispatchError::Failed(_))));
        assert!(matches!(
            job.arg_list("add"),
            Err(DispatchError::InvalidArguments { .. })
        ));
    }

    #[test]
    fn test_assigned_job_ids_are_lenient() {
        let job: AssignedJob =
            serde_json::from_value(json!({"job_id": 42, "client_id": ["c1"]})).unwrap();
        assert_eq!(job.job_id.as_deref(), Some("42"));
        assert_eq!(job.client_id, None);
        assert_eq!(job.function_name(), Err(DispatchError::MissingFunction));
    }
}
