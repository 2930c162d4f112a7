// SPDX-License-Identifier: GPL-3.0-only

//! Per-LUN mutual exclusion and per-operation admission control

pub mod lock;
pub mod semaphore;

pub use lock::{LunLockGuard, LunLockManager};
pub use semaphore::OperationSemaphores;
