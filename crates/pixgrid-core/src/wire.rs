//! Channel message bodies.
//!
//! Both channels carry JSON. A job body is a serialized [`Job`]; a result
//! body is a serialized [`ClassificationResult`]. For jobs, a bare id
//! string is also accepted on read so that hand-enqueued work still flows
//! (the name is then the id and the source key is the id).

use crate::error::{CoreError, CoreResult};
use crate::types::{ClassificationResult, Job, JobId};

pub fn encode_job(job: &Job) -> CoreResult<String> {
    serde_json::to_string(job).map_err(|e| CoreError::Serialize(e.to_string()))
}

pub fn decode_job(body: &str) -> CoreResult<Job> {
    let body = body.trim();
    if body.starts_with('{') {
        return serde_json::from_str(body).map_err(|e| CoreError::MalformedMessage(e.to_string()));
    }
    if body.is_empty() || body.contains(char::is_whitespace) {
        return Err(CoreError::MalformedMessage(format!("bad job id {body:?}")));
    }
    let id = JobId::from(body);
    Ok(Job {
        name: body.to_string(),
        source_key: body.to_string(),
        id,
        expires_at_ms: 0,
    })
}

pub fn encode_result(result: &ClassificationResult) -> CoreResult<String> {
    serde_json::to_string(result).map_err(|e| CoreError::Serialize(e.to_string()))
}

pub fn decode_result(body: &str) -> CoreResult<ClassificationResult> {
    serde_json::from_str(body).map_err(|e| CoreError::MalformedMessage(e.to_string()))
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::types::Outcome;

    #[test]
    fn job_body_is_json() {
        let job = Job::new(JobId::from("cat-1"), "cat", Duration::from_secs(5));
        let body = encode_job(&job).unwrap();
        assert!(body.contains(r#""id":"cat-1""#));
        assert_eq!(decode_job(&body).unwrap(), job);
    }

    #[test]
    fn bare_id_job_body_is_accepted() {
        let job = decode_job("cat\n").unwrap();
        assert_eq!(job.id.as_str(), "cat");
        assert_eq!(job.source_key, "cat");
        assert_eq!(job.expires_at_ms, 0);
    }

    #[test]
    fn garbage_job_body_is_malformed() {
        assert!(matches!(decode_job(""), Err(CoreError::MalformedMessage(_))));
        assert!(matches!(decode_job("{not json"), Err(CoreError::MalformedMessage(_))));
        assert!(matches!(decode_job("two words"), Err(CoreError::MalformedMessage(_))));
    }

    #[test]
    fn result_body_tags_outcome() {
        let result = ClassificationResult {
            job_id: JobId::from("cat-1"),
            name: "cat".into(),
            outcome: Outcome::Classified {
                label: "feline".into(),
            },
            expires_at_ms: 0,
        };
        let body = encode_result(&result).unwrap();
        assert!(body.contains(r#""status":"classified""#));
        assert_eq!(decode_result(&body).unwrap(), result);
    }

    #[test]
    fn delimited_result_body_is_rejected() {
        assert!(matches!(
            decode_result("cat,feline"),
            Err(CoreError::MalformedMessage(_))
        ));
    }
}
