//! Workspace-layout I/O: job/extension discovery and loading, per-prompt UI
//! session state, build-hook operation files, and job export/validation —
//! the filesystem conventions shared by the CLI front-end and the HTTP
//! gateway, factored out of both so neither duplicates the other's
//! directory layout assumptions.

pub mod export;
pub mod operations;
pub mod session;
pub mod validate;
pub mod workspace;

pub use export::{export_job, job_to_yaml, order_job_keys};
pub use operations::{list_operations, load_operation, save_operation, Mappings, Operation};
pub use session::{read_session, save_prompt_state, PromptState, Session, ShortlistItem, ShortlistSource};
pub use validate::{validate_job, ValidationReport};
pub use workspace::{artifacts_dir, ext_dir, job_dir, jobs_dir, list_jobs, load_extension_table, load_job, JobSummary};
