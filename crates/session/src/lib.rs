/*
 * 5D Labs Kiln Platform - Live Session Streaming
 * Copyright (C) 2025 5D Labs
 *
 * This program is free software: you can redistribute it and/or modify
 * it under the terms of the GNU Affero General Public License as published
 * by the Free Software Foundation, either version 3 of the License, or
 * (at your option) any later version.
 *
 * This program is distributed in the hope that it will be useful,
 * but WITHOUT ANY WARRANTY; without even the implied warranty of
 * MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
 * GNU Affero General Public License for more details.
 *
 * You should have received a copy of the GNU Affero General Public License
 * along with this program. If not, see <https://www.gnu.org/licenses/>.
 */

//! Live sessions against running workloads
//!
//! An exec session multiplexes stdin, stdout and stderr over one WebSocket
//! using the Kubernetes channel framing. A log session receives JSON log
//! records. Both are driven by a cancellation token and close their
//! transport exactly once.

pub mod closer;
pub mod error;
pub mod exec;
pub mod frame;
pub mod logs;
pub mod transport;

pub use closer::SessionCloser;
pub use error::{Result, SessionError};
pub use exec::SessionMultiplexer;
pub use frame::{Channel, Frame, FrameError, Subprotocol};
pub use logs::{LogPrinter, LogRecord, LogSink, LogStreamRelay};
pub use transport::{CloseInfo, MessageSink, MessageSource, TransportError, WireMessage};
