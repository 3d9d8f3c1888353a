//! Audit trail: staging entries alongside state changes and exporting them
//! for compliance review.

pub mod export;
pub mod recorder;

pub use export::{
    digest_path, export_json, verify_audit_export, write_audit_export, AuditExportReceipt,
};
pub use recorder::AuditRecorder;
