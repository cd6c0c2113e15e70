mod certificates;
mod common;
mod registry;
