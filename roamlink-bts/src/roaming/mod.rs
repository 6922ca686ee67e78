//! Roaming Core
//!
//! Subscriber state, the registration/authentication engine, and the
//! call/SMS/USSD router. The roaming task drives all three from a single
//! message loop, so handlers run to completion and no two of them mutate
//! the same subscriber concurrently.

mod engine;
mod router;
mod store;
mod task;

pub use engine::{
    AuthCredentials, PendingChallenge, RegisterOutcome, RegisterRequest, RegistrationEngine,
};
pub use router::{
    IdentityRef, RouteKind, RouteRequest, RouteVerdict, Router, SMS_BINARY_TYPE, SMS_TEXT_TYPE,
};
pub use store::{
    FilePersistence, MemoryPersistence, OpCounters, Subscriber, SubscriberPersistence,
    SubscriberStore,
};
pub use task::RoamingTask;
