//! Shadow CRD Definitions
//!
//! Kubernetes Custom Resource Definitions for the Shadow controller.

pub mod shadow;

pub use shadow::*;
