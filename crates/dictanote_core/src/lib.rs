pub mod crypto;
pub mod domain;
pub mod drafts;
pub mod pipeline;
pub mod ports;
pub mod pseudonym;
pub mod subjects;

pub use crypto::{CryptoError, KeyDeriver, SymmetricKey};
pub use domain::{
    Account, AccountCredentials, AuthContext, BackendTier, Dictation, Draft, DraftState,
    DraftStep, GenerationInput, StoredSubject, Subject, SubjectFields, UserIdentity,
};
pub use drafts::{DraftGuard, MemoryDraftStorage};
pub use pipeline::{
    GenerationOrchestrator, GenerationOutcome, PipelineError, PipelinePolicy, PipelineState,
    UnavailableCause,
};
pub use ports::{
    AnnotationResponse, AnnotationService, DatabaseService, DraftStorage, PortError, PortResult,
    SpeechToTextService,
};
pub use pseudonym::{AnnotationRequest, Pseudonym, Pseudonymizer};
pub use subjects::{SubjectVault, VaultError};
