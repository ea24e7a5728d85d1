// SPDX-License-Identifier: Apache-2.0

pub mod loader;
pub mod manager;
pub mod proxy;
pub mod stdout_bridge;
pub mod types;

pub use loader::Loader;
pub use manager::{CallbackEndpoints, PluginManager};
pub use proxy::ExternalProxy;
pub use types::ManagedPlugin;
