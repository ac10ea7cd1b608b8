pub mod backend;
pub mod draft;
pub mod highlight;
pub mod outline;
pub mod report;
pub mod sections;
pub mod session;
pub mod view;
