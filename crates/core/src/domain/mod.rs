pub mod approval;
pub mod conversation;
pub mod escalation;
pub mod feedback;
pub mod webhook;
