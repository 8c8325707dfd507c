//! # LLMRing Receipts Testkit
//!
//! Testing utilities for LLM usage receipts.
//!
//! ## Overview
//!
//! This crate provides:
//!
//! - **Golden vectors**: Receipts with their exact expected canonical JSON
//! - **Generators**: Proptest strategies for property-based testing
//! - **Fixtures**: A service over an in-memory store plus seeding helpers
//!
//! ## Golden Vectors
//!
//! Golden vectors pin the signed bytes so other verifiers can check
//! themselves against this one:
//!
//! ```rust
//! use llmring_receipts_testkit::vectors::{all_vectors, signed_from_vector};
//!
//! for vector in all_vectors() {
//!     let receipt = signed_from_vector(&vector).unwrap();
//!     println!("{}: {}", vector.name, receipt.signature);
//! }
//! ```
//!
//! ## Property Testing
//!
//! ```rust,ignore
//! use proptest::prelude::*;
//! use llmring_receipts_testkit::generators::{unsigned_from_params, ReceiptParams};
//!
//! proptest! {
//!     #[test]
//!     fn signing_is_deterministic(params: ReceiptParams) {
//!         let keypair = params.keypair();
//!         let a = unsigned_from_params(&params).unwrap().sign(&keypair).unwrap();
//!         let b = unsigned_from_params(&params).unwrap().sign(&keypair).unwrap();
//!         prop_assert_eq!(a.signature, b.signature);
//!     }
//! }
//! ```
//!
//! ## Test Fixtures
//!
//! ```rust,ignore
//! use llmring_receipts_testkit::fixtures::TestFixture;
//!
//! let fixture = TestFixture::new();
//! fixture.seed_usage(10).await?;
//! ```

pub mod fixtures;
pub mod generators;
pub mod vectors;

pub use fixtures::{at_minute, base_time, TestFixture};
pub use generators::{unsigned_from_params, ReceiptParams};
pub use vectors::{all_vectors, signed_from_vector, verify_all_vectors, GoldenVector};
