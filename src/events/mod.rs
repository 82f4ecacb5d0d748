pub mod dispatcher;
pub mod init;
pub mod model;
pub mod sink;

pub use dispatcher::*;
pub use init::*;
pub use model::*;
pub use sink::*;
