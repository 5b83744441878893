pub mod result_exchange;
