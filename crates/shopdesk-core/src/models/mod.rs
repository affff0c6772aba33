//! Data models for the backend's resources.
//!
//! - `user`: registration form, login/registration responses, profile
//! - `product`: product records and the platforms they are listed on
//! - `upload`: image files prepared for multipart upload

pub mod product;
pub mod upload;
pub mod user;

pub use product::{MessageResponse, Platform, Product, UploadedProduct};
pub use upload::ImageUpload;
pub use user::{Profile, ProfileUpdate, RegisteredUser, RegistrationForm, UserSummary};
