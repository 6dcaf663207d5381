// Copyright 2026 Phillip Cloud
// Licensed under the Apache License, Version 2.0

pub mod error;
pub mod ids;
pub mod model;
pub mod search;
pub mod table;

pub use error::*;
pub use ids::*;
pub use model::*;
pub use search::*;
pub use table::*;
