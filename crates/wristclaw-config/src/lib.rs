// SPDX-License-Identifier: Apache-2.0
mod loader;
mod schema;

pub use loader::{load, load_from_str};
pub use schema::*;
