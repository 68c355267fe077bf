#[macro_use]
extern crate lazy_static;

pub mod manager;

pub use manager::Manager;

pub mod opendal {
    pub use opendal::{
        Builder, Entry, EntryMode, Error, ErrorKind, Lister, Metadata, Operator, Reader, Result,
        Writer,
    };

    pub mod services {
        pub use opendal::services::Fs;
    }

    pub mod layers {
        pub use opendal::layers::*;
    }
}

/// operator builds a filesystem operator rooted at the given directory.
pub fn operator(root: &str) -> std::io::Result<crate::opendal::Operator> {
    let mut path = root.to_string();
    if !path.starts_with('/') {
        path = std::env::current_dir()?.join(path).display().to_string();
    }

    let mut builder = opendal::services::Fs::default();
    builder.root(&path);

    let operator = opendal::Operator::new(builder)?
        .layer(opendal::layers::LoggingLayer::default())
        .finish();

    Ok(operator)
}
