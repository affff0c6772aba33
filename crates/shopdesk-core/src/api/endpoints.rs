//! Typed wrappers around the backend's account and product endpoints.

use reqwest::Method;
use tracing::{debug, info};

use crate::models::product::UploadResponse;
use crate::models::{
    ImageUpload, MessageResponse, Platform, Product, Profile, ProfileUpdate, RegisteredUser,
    RegistrationForm, UploadedProduct,
};

use super::{ApiClient, ApiError, MultipartBody, RequestBody, RequestOptions};

const REGISTER_ENDPOINT: &str = "register/";
const PROFILE_ENDPOINT: &str = "profile/";
const PROFILE_UPDATE_ENDPOINT: &str = "profile/update/";
const PRODUCTS_ENDPOINT: &str = "shopify-products/";

impl ApiClient {
    // ===== Account =====

    /// Create an account. Field errors come back as `ApiError::Validation`.
    /// Tokens issued by the backend here are not stored.
    pub async fn register(&self, form: &RegistrationForm) -> Result<RegisteredUser, ApiError> {
        let body = serde_json::to_value(form)
            .map_err(|e| ApiError::InvalidRequest(format!("Failed to serialize registration: {}", e)))?;
        let user: RegisteredUser = self
            .public_request(Method::POST, REGISTER_ENDPOINT, RequestBody::Json(body), RequestOptions::default())
            .await?
            .json()?;
        info!(user_id = user.user.id, "Account registered");
        Ok(user)
    }

    /// Fetch the authenticated user's profile
    pub async fn profile(&self) -> Result<Profile, ApiError> {
        self.get(PROFILE_ENDPOINT).await
    }

    /// Update bio and/or profile picture
    pub async fn update_profile(&self, update: ProfileUpdate) -> Result<Profile, ApiError> {
        let form = update.into_form()?;
        debug!(fields = ?form.field_names(), "Updating profile");
        self.put_multipart(PROFILE_UPDATE_ENDPOINT, form).await
    }

    // ===== Products =====

    /// All active products, newest first. Each record carries its `label`;
    /// there is no per-platform listing endpoint.
    pub async fn list_products(&self) -> Result<Vec<Product>, ApiError> {
        let products: Vec<Product> = self.get(PRODUCTS_ENDPOINT).await?;
        debug!(count = products.len(), "Fetched products");
        Ok(products)
    }

    pub async fn product(&self, id: i64) -> Result<Product, ApiError> {
        self.get(&format!("{}{}/", PRODUCTS_ENDPOINT, id)).await
    }

    /// Upload a product image; the backend generates the listing from it
    pub async fn upload_product(
        &self,
        platform: Platform,
        image: ImageUpload,
    ) -> Result<UploadedProduct, ApiError> {
        if image.is_empty() {
            return Err(ApiError::InvalidRequest("Please select an image file".to_string()));
        }
        debug!(%platform, file = %image.file_name, bytes = image.len(), "Uploading product image");
        let form = MultipartBody::new().file("product_image", image);
        let response: UploadResponse = self.post_multipart(&platform.create_path(), form).await?;
        let uploaded = UploadedProduct::from(response);
        info!(%platform, id = uploaded.id, "Product created");
        Ok(uploaded)
    }

    /// Remove a product (the backend soft-deletes it)
    pub async fn delete_product(&self, platform: Platform, id: i64) -> Result<String, ApiError> {
        let response: Option<MessageResponse> = self.delete(&platform.delete_path(id)).await?;
        info!(%platform, id, "Product deleted");
        Ok(response.map(|r| r.message).unwrap_or_default())
    }
}
