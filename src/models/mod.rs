//! Data models for jobscout.

mod company;
mod job;
mod source;
mod work_item;

pub use company::{normalize_company_name, Company, CompanyTier};
pub use job::{JobListing, JobMatch, JobRecord, ResumeIntake};
pub use source::{Confidence, SelectorConfig, Source, SourceHealth, SourceType};
pub use work_item::{
    WorkItem, WorkItemStatus, WorkItemType, DEFAULT_MAX_RETRIES, DEFAULT_MAX_SPAWN_DEPTH,
};
