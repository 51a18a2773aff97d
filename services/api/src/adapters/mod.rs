pub mod alma;
pub mod db;

pub use alma::AlmaClient;
pub use db::DbAdapter;
