macro_rules! v1_path {
    ($path:literal) => {
        concat!("/api/v1", $path)
    };
}

/// Versioned backend routes used by the HTTP transport and push source.
pub mod v1 {
    pub const ROOT: &str = "/api/v1";

    pub mod extraction {
        pub const SUBMIT: &str = v1_path!("/extract");
        pub const JOBS: &str = v1_path!("/jobs");
        pub const STATUS: &str = v1_path!("/jobs/{id}");
        pub const RESULT: &str = v1_path!("/jobs/{id}/result");
        pub const EVENTS: &str = v1_path!("/jobs/{id}/events");
    }

    pub mod render {
        pub const SUBMIT: &str = v1_path!("/render");
        pub const JOBS: &str = v1_path!("/render/jobs");
        pub const STATUS: &str = v1_path!("/render/jobs/{id}");
        pub const RESULT: &str = v1_path!("/render/jobs/{id}/result");
        pub const EVENTS: &str = v1_path!("/render/jobs/{id}/events");
        pub const DOWNLOAD: &str = v1_path!("/render/jobs/{id}/download");
    }
}

/// Authentication lives outside the versioned prefix.
pub mod auth {
    pub const LOGIN: &str = "/auth/login";
    pub const LOGOUT: &str = "/auth/logout";
}

use cloudviz_model::{JobId, JobKind};

pub fn submit(kind: JobKind) -> &'static str {
    match kind {
        JobKind::Extraction => v1::extraction::SUBMIT,
        JobKind::Render => v1::render::SUBMIT,
    }
}

pub fn jobs(kind: JobKind) -> &'static str {
    match kind {
        JobKind::Extraction => v1::extraction::JOBS,
        JobKind::Render => v1::render::JOBS,
    }
}

pub fn status(kind: JobKind, job_id: &JobId) -> String {
    let route = match kind {
        JobKind::Extraction => v1::extraction::STATUS,
        JobKind::Render => v1::render::STATUS,
    };
    replace_param(route, "{id}", job_id.as_str())
}

pub fn result(kind: JobKind, job_id: &JobId) -> String {
    let route = match kind {
        JobKind::Extraction => v1::extraction::RESULT,
        JobKind::Render => v1::render::RESULT,
    };
    replace_param(route, "{id}", job_id.as_str())
}

pub fn events(kind: JobKind, job_id: &JobId) -> String {
    let route = match kind {
        JobKind::Extraction => v1::extraction::EVENTS,
        JobKind::Render => v1::render::EVENTS,
    };
    replace_param(route, "{id}", job_id.as_str())
}

/// Where a finished render job's output can be downloaded.
pub fn download(job_id: &JobId) -> String {
    replace_param(v1::render::DOWNLOAD, "{id}", job_id.as_str())
}

/// Replace a single path parameter (e.g. `"{id}"`) with the provided value.
pub fn replace_param(route: &str, param: &str, value: impl AsRef<str>) -> String {
    route.replace(param, value.as_ref())
}
