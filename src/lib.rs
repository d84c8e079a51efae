pub mod request;
pub mod events;
pub mod coordinator;
pub mod collector;
pub mod archive;
pub mod sections;
pub mod validate;
pub mod config;
pub mod logging;

pub use request::{BugreportMode, ErrorKind, OperationId, ReportRequest};
pub use events::{EventSink, Outcome, ReportEvent, WaitOutcome};
pub use coordinator::{OperationRecord, OperationState, RequestCoordinator, ServiceHandle, SubmitError};
pub use collector::{CollectionContext, CollectorError, ConsentDecision, DryRunCollector, ReportCollector};
pub use archive::{ArchiveEntry, ArchiveError, ArchiveReader, EntryInfo, ReportArchiveWriter};
pub use sections::{Section, SectionParser};
pub use validate::{validate_archive, ValidationProfile, ValidationReport};
pub use config::CoordinatorConfig;
