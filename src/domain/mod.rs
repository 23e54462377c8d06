// Domain layer: registry records and the store port. No engine logic here.

pub mod model;
pub mod ports;
