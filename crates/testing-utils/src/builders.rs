//! Test data builders for creating test entities
//!
//! Builders start from sensible defaults so each test only spells out
//! the fields it cares about.

use bioqueue_core::config::{
    ConfigurationConfig, ExecutorKind, LimitRule, OptionConfig, OutputConfig, ServiceConfig,
};
use bioqueue_domain::{JobRecord, JobStatus, Request, RequestOption, RequestStatus};
use chrono::Utc;

/// Builder for creating test Request entities
pub struct RequestBuilder {
    request: Request,
}

impl RequestBuilder {
    pub fn new(id: i64) -> Self {
        Self {
            request: Request {
                id,
                uuid: uuid::Uuid::new_v4().simple().to_string(),
                service: "echo".to_string(),
                status: RequestStatus::Pending,
                options: Vec::new(),
                created_at: Utc::now(),
            },
        }
    }

    pub fn with_service(mut self, service: &str) -> Self {
        self.request.service = service.to_string();
        self
    }

    pub fn with_status(mut self, status: RequestStatus) -> Self {
        self.request.status = status;
        self
    }

    pub fn with_option(mut self, name: &str, value: &str) -> Self {
        self.request.options.push(RequestOption {
            name: name.to_string(),
            value: Some(value.to_string()),
        });
        self
    }

    pub fn build(self) -> Request {
        self.request
    }
}

/// Builder for creating test JobRecord entities
pub struct JobRecordBuilder {
    job: JobRecord,
}

impl JobRecordBuilder {
    pub fn new(request_id: i64) -> Self {
        Self {
            job: JobRecord {
                id: request_id,
                request_id,
                service: "echo".to_string(),
                configuration: Some("local".to_string()),
                job_ref: None,
                working_dir: None,
                status: JobStatus::Queued,
                return_code: None,
                files: Vec::new(),
            },
        }
    }

    pub fn with_service(mut self, service: &str) -> Self {
        self.job.service = service.to_string();
        self
    }

    pub fn with_configuration(mut self, configuration: &str) -> Self {
        self.job.configuration = Some(configuration.to_string());
        self
    }

    pub fn with_job_ref(mut self, job_ref: &str) -> Self {
        self.job.job_ref = Some(job_ref.to_string());
        self
    }

    pub fn with_working_dir(mut self, working_dir: &str) -> Self {
        self.job.working_dir = Some(working_dir.to_string());
        self
    }

    pub fn with_status(mut self, status: JobStatus) -> Self {
        self.job.status = status;
        self
    }

    pub fn build(self) -> JobRecord {
        self.job
    }
}

/// Builder for service definitions as they appear in the config file
pub struct ServiceConfigBuilder {
    service: ServiceConfig,
}

impl ServiceConfigBuilder {
    pub fn new(name: &str) -> Self {
        Self {
            service: ServiceConfig {
                name: name.to_string(),
                options: Vec::new(),
                outputs: Vec::new(),
                configurations: Vec::new(),
            },
        }
    }

    pub fn with_option(mut self, name: &str, param: &str, default: Option<&str>) -> Self {
        self.service.options.push(OptionConfig {
            name: name.to_string(),
            param: param.to_string(),
            default: default.map(String::from),
        });
        self
    }

    pub fn with_output_path(mut self, path: &str) -> Self {
        self.service.outputs.push(OutputConfig {
            path: Some(path.to_string()),
            pattern: None,
            option: None,
        });
        self
    }

    pub fn with_output_pattern(mut self, pattern: &str) -> Self {
        self.service.outputs.push(OutputConfig {
            path: None,
            pattern: Some(pattern.to_string()),
            option: None,
        });
        self
    }

    pub fn with_configuration(mut self, name: &str, executor: ExecutorKind, bin: &str) -> Self {
        self.service.configurations.push(ConfigurationConfig {
            name: name.to_string(),
            executor,
            bin: bin.to_string(),
            queue_args: Vec::new(),
            env: Default::default(),
            limits: Vec::new(),
            submit_command: None,
            status_command: None,
        });
        self
    }

    /// Adjust the most recently added configuration
    pub fn configure<F>(mut self, adjust: F) -> Self
    where
        F: FnOnce(&mut ConfigurationConfig),
    {
        if let Some(last) = self.service.configurations.last_mut() {
            adjust(last);
        }
        self
    }

    pub fn with_limit(self, rule: LimitRule) -> Self {
        self.configure(|conf| conf.limits.push(rule))
    }

    pub fn build(self) -> ServiceConfig {
        self.service
    }
}
