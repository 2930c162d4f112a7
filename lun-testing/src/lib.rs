// SPDX-License-Identifier: GPL-3.0-only

//! Test doubles for the `CommandRunner` and `DeviceProbe` ports
//!
//! Both doubles can be scripted by call order or by elapsed time, which is
//! how tests reproduce devices and multipath maps appearing asynchronously.

pub mod probe;
pub mod runner;

pub use probe::FakeProbe;
pub use runner::ScriptedRunner;
