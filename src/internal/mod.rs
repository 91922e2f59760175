pub(crate) mod binding_registry;
pub(crate) mod dispatcher;
pub(crate) mod foreign_data;
pub(crate) mod handle_table;
pub(crate) mod pointer_registry;
pub(crate) mod utils;
