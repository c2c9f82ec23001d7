pub mod btree;
pub mod cache;
pub mod node;
pub mod page;
pub mod pager;
pub mod table;
