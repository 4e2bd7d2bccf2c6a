pub mod abi;
pub mod evm;
pub mod exec;
pub mod expr;
pub mod feeschedule;
pub mod fetch;
pub mod format;
pub mod keccak;
pub mod op;
pub mod precompiled;
pub mod rlp;
pub mod transactions;
pub mod types;
