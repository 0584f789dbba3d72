pub mod axon;
