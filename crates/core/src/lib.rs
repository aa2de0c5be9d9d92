pub mod decision;
pub mod detection;
pub mod effect;
pub mod envelope;
pub mod error;
pub mod geo;
pub mod message;
pub mod policy;
pub mod proposal;
pub mod signature;
pub mod track;
pub mod types;

pub use decision::Decision;
pub use detection::Detection;
pub use effect::{Effect, EffectStatus, idempotent_key};
pub use envelope::{Envelope, SourceType};
pub use error::ValidationError;
pub use geo::{Position, Velocity, circular_mean_heading, haversine_m, mean_position};
pub use message::Message;
pub use policy::PolicyDecision;
pub use proposal::{Proposal, PriorityBucket, TrackSummary};
pub use signature::{SignatureError, compute_signature, verify_signature};
pub use track::{CorrelatedTrack, Track};
pub use types::{ActionType, Classification, ThreatLevel, TrackType};
