pub mod assets;
pub mod db;
pub mod firebase;

pub use assets::FsAssetGateway;
pub use db::DbAdapter;
pub use firebase::FirebaseVerifier;
