// Unless explicitly stated otherwise all files in this repository are licensed
// under the Apache License Version 2.0.
// This product includes software developed at Datadog (https://www.datadoghq.com/).
// Copyright 2026-present Datadog, Inc.

pub mod attributes;
pub mod cli;
pub mod command;
pub mod config;
pub mod duration;
pub mod engine;
pub mod env;
pub mod error;
pub mod journal;
pub mod process;
pub mod rpc;
pub mod schedule;
pub mod shutdown;

pub use attributes::ProcessAttributes;
pub use command::Command;
pub use engine::{EngineSettings, SubmitHandle, Supervisor};
pub use error::{EngineError, SubmitError};
pub use process::Metadata;
