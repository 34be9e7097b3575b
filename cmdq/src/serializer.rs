//! The flat-field codec between [`Job`] and its stored form.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::job::{Job, JobId};
use crate::BackendError;

/// The flat field mapping a backend persists for one job.
///
/// `arguments` is the JSON encoding of the argument vector so that backends
/// can store it in a single text column or list entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SerializedJob {
    pub id: String,
    pub name: String,
    pub arguments: String,
    pub max_retries: u32,
    pub retries: u32,
}

/// Converts jobs to and from [`SerializedJob`].
///
/// Stateless; backends hold one by value.
#[derive(Debug, Clone, Copy, Default)]
pub struct JobSerializer;

impl JobSerializer {
    pub fn new() -> Self {
        Self
    }

    pub fn serialize(&self, job: &Job) -> Result<SerializedJob, BackendError> {
        Ok(SerializedJob {
            id: job.id().to_string(),
            name: job.name().to_owned(),
            arguments: serde_json::to_string(job.arguments())?,
            max_retries: job.max_retries(),
            retries: job.retries(),
        })
    }

    pub fn deserialize(&self, record: &SerializedJob) -> Result<Job, BackendError> {
        let id = Uuid::parse_str(&record.id)
            .map_err(|err| BackendError::Malformed(format!("bad job id {:?}: {err}", record.id)))?;
        let arguments: Vec<String> = serde_json::from_str(&record.arguments)?;
        Ok(Job::from_parts(
            JobId::from(id),
            record.name.clone(),
            arguments,
            record.max_retries,
            record.retries,
        ))
    }
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;

    #[test]
    fn round_trip_preserves_every_field() {
        let serializer = JobSerializer::new();
        let job = Job::new(
            "report",
            vec!["--format".to_owned(), "json".to_owned()],
            3,
        );

        let record = serializer.serialize(&job).unwrap();
        let restored = serializer.deserialize(&record).unwrap();

        assert_eq!(restored, job);
        assert_eq!(restored.id(), job.id());
    }

    #[test]
    fn arguments_are_stored_as_json() {
        let serializer = JobSerializer::new();
        let job = Job::new("echo", vec!["hello".to_owned()], 0);

        let record = serializer.serialize(&job).unwrap();

        assert_eq!(record.arguments, r#"["hello"]"#);
        assert_eq!(record.max_retries, 0);
        assert_eq!(record.retries, 0);
    }

    #[test]
    fn malformed_arguments_surface_a_decode_error() {
        let serializer = JobSerializer::new();
        let record = SerializedJob {
            id: JobId::new().to_string(),
            name: "echo".to_owned(),
            arguments: "not json".to_owned(),
            max_retries: 0,
            retries: 0,
        };

        assert_matches!(
            serializer.deserialize(&record),
            Err(BackendError::EncodeDecode(_))
        );
    }

    #[test]
    fn malformed_id_surfaces_a_decode_error() {
        let serializer = JobSerializer::new();
        let record = SerializedJob {
            id: "not-a-uuid".to_owned(),
            name: "echo".to_owned(),
            arguments: "[]".to_owned(),
            max_retries: 0,
            retries: 0,
        };

        assert_matches!(
            serializer.deserialize(&record),
            Err(BackendError::Malformed(_))
        );
    }
}
