// SPDX-License-Identifier: (MIT OR Apache-2.0)
//! Pool construction errors.

use std::io;

use thiserror::Error;

/// The OS refused to start a worker thread.
///
/// This is the only error the pool propagates: quiescence and shutdown
/// never fail, and invalid configuration is a caller bug reported by
/// assertion. When construction fails partway, the already-started
/// workers are terminated and joined before this surfaces.
#[derive(Debug, Error)]
#[error("failed to spawn worker thread: {0}")]
pub struct SpawnError(#[from] io::Error);
