//! mdbook-pytabs library
//!
//! Turns Python code blocks into tab sets, one tab per minimum Python
//! version whose idiomatic rendering of the code differs. Renderings come
//! from an external upgrade tool (ruff by default) invoked once per target
//! version and are cached across builds.
//!
//! ## Public API
//!
//! The main interface is [`PyTabsPreprocessor`], which implements the mdBook
//! `Preprocessor` trait. The binary also rewrites standalone markdown and
//! reStructuredText files through [`Transformer`].
//!
//! Building blocks:
//! - [`Upgrader`] - the upgrade oracle, implemented by [`RuffUpgrader`] and closures
//! - [`ladder::LadderBuilder`] - distinct renderings across a version range
//! - [`tabs`] - tab synthesis for markdown (`===`) and reST (`tab-set`)
//! - [`extractor`] and [`rst`] - block location in each host syntax
//! - [`FragmentCache`] - fingerprint-keyed cache with persistent storage

pub mod cache;
pub mod config;
pub mod directives;
pub mod error;
pub mod extractor;
pub mod fence;
pub mod fragment;
pub mod ladder;
pub mod preprocessor;
pub mod rendering;
pub mod reporting;
pub mod rst;
pub mod tabs;
pub mod task_collector;
pub mod title;
pub mod transform;
pub mod upgrade;
pub mod version;

pub use cache::{Eviction, FileStore, FragmentCache};
pub use config::PyTabsConfig;
pub use error::{ConfigError, TransformError, UpgradeError};
pub use preprocessor::PyTabsPreprocessor;
pub use transform::Transformer;
pub use upgrade::{RuffUpgrader, Upgrader};
pub use version::{PythonVersion, VersionRange};
