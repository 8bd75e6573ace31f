pub mod inspect;
pub mod oauth;
pub mod orchestrator;
pub mod reconcile;
pub mod run_context;
