//! Run/Job/Task naming convention
//!
//! Tasks of a job are named `"{index}.{job}"`; jobs created through a run
//! are named `"{job}.{run}"`. A job name may therefore carry at most one dot.

use ncluster_foundation::{Error, Result};

/// `"{prefix}-{8 hex chars}"`
pub fn auto_name(prefix: &str) -> String {
    let id = uuid::Uuid::new_v4().simple().to_string();
    format!("{}-{}", prefix, &id[..8])
}

/// Use `name` unless it is blank
pub fn or_auto(name: &str, prefix: &str) -> String {
    if name.trim().is_empty() {
        auto_name(prefix)
    } else {
        name.to_string()
    }
}

pub fn task_name(index: usize, job: &str) -> String {
    format!("{}.{}", index, job)
}

pub fn job_name_in_run(job: &str, run: &str) -> String {
    format!("{}.{}", job, run)
}

pub fn validate_job_name(name: &str) -> Result<()> {
    if name.matches('.').count() > 1 {
        return Err(Error::InvalidInput(format!(
            "Job name {} has too many dots (expected at most one, as in job.run)",
            name
        )));
    }
    Ok(())
}

/// Container name for a task: `ncluster-` prefix, dots and other
/// characters outside `[A-Za-z0-9_-]` replaced with `-`
pub fn container_name(task: &str) -> String {
    let sanitized: String = task
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '_' || c == '-' {
                c
            } else {
                '-'
            }
        })
        .collect();
    format!("ncluster-{}", sanitized)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_auto_name() {
        let name = auto_name("job");
        assert!(name.starts_with("job-"));
        assert_eq!(name.len(), "job-".len() + 8);
        assert!(name[4..].chars().all(|c| c.is_ascii_hexdigit()));
        assert_ne!(auto_name("job"), auto_name("job"));
    }

    #[test]
    fn test_or_auto() {
        assert_eq!(or_auto("train", "job"), "train");
        assert!(or_auto("  ", "task").starts_with("task-"));
    }

    #[test]
    fn test_hierarchy_names() {
        let job = job_name_in_run("worker", "exp1");
        assert_eq!(job, "worker.exp1");
        assert_eq!(task_name(2, &job), "2.worker.exp1");
    }

    #[test]
    fn test_validate_job_name() {
        assert!(validate_job_name("worker").is_ok());
        assert!(validate_job_name("worker.exp1").is_ok());
        assert!(matches!(
            validate_job_name("a.b.c"),
            Err(Error::InvalidInput(_))
        ));
    }

    #[test]
    fn test_container_name() {
        assert_eq!(container_name("0.worker.exp1"), "ncluster-0-worker-exp1");
        assert_eq!(container_name("a b/c"), "ncluster-a-b-c");
    }
}
