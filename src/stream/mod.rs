//! Stream types handed out to applications

mod sensor;

pub use sensor::SensorStream;
