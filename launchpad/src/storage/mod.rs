//! Local storage: layout, settings and the session store

pub mod layout;
pub mod sessions;
pub mod settings;
