//! Integration tests


mod test_approval;
mod test_registry;
mod test_rollback;
