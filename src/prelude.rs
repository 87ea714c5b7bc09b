pub use color_eyre::eyre::{bail, WrapErr};
pub use color_eyre::{Result, Section};
pub use itertools::Itertools;
pub use std::path::{Path, PathBuf};
