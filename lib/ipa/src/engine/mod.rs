// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2025 Oxide Computer Company

//! Compilation, table tracking, and batching of IPA rules.
pub mod compile;
pub mod counter;
pub mod session;
pub mod table;
pub mod transport;

pub use compile::CompileError;
pub use counter::CounterError;
pub use session::SessionConfig;
pub use table::TableError;
pub use table::TableManager;
pub use transport::Transport;
pub use transport::TransportError;
