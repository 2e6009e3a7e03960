//! Scenarios that run the kernel, the query layer and the world together.

#[cfg(test)]
mod delayed_messages;

#[cfg(test)]
mod vfs_images;

#[cfg(test)]
pub(crate) fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}
