//! Synchronous facades over the async API, driven by a shared multi-threaded runtime.
//!
//! Streaming sessions started through these wrappers run on the same runtime, so they
//! keep receiving frames between blocking calls.

pub mod database;

use once_cell::sync::Lazy;
use tokio::runtime::Runtime;

macro_rules! block_on_methods {
    ($(fn $name:ident($($arg:ident : $ty:ty),*) -> $ret:ty);* $(;)?) => {
        $(pub fn $name(&self, $($arg:$ty),*) -> $ret {
            RT.block_on(self.inner.$name($($arg),*))
        })*
    };
}

pub(crate) use block_on_methods;

static RT: Lazy<Runtime> = Lazy::new(|| {
    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .thread_name("rtdb-blocking")
        .build()
        .unwrap_or_else(|err| panic!("failed to build the blocking runtime: {err}"))
});

fn block_on<F: std::future::Future>(fut: F) -> F::Output {
    RT.block_on(fut)
}
