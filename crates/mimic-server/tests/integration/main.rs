mod helpers;

mod basic_operations;
mod blocking;
mod cli;
mod data_types;
mod databases;
mod transactions;
