pub mod client;

pub use client::{ActivationCode, DirectoryClient, DirectoryError};
