use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Marketplace a product listing is generated for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Platform {
    #[default]
    Shopify,
    Amazon,
}

impl Platform {
    fn prefix(self) -> &'static str {
        match self {
            Platform::Shopify => "shopify-products",
            Platform::Amazon => "amazon-products",
        }
    }

    pub fn create_path(self) -> String {
        format!("{}/create/", self.prefix())
    }

    pub fn delete_path(self, id: i64) -> String {
        format!("{}/{}/delete/", self.prefix(), id)
    }
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Platform::Shopify => f.write_str("shopify"),
            Platform::Amazon => f.write_str("amazon"),
        }
    }
}

impl FromStr for Platform {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "shopify" => Ok(Platform::Shopify),
            "amazon" => Ok(Platform::Amazon),
            other => Err(format!("unknown platform '{}' (expected shopify or amazon)", other)),
        }
    }
}

/// A generated product listing as returned by the listing endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Product {
    pub id: i64,
    pub product_name: String,
    pub product_image: Option<String>,
    pub sku: String,
    pub csv_file: Option<String>,
    #[serde(default)]
    pub excel_file: Option<String>,
    pub created_at: Option<DateTime<Utc>>,
    pub updated_at: Option<DateTime<Utc>>,
    #[serde(default = "default_true")]
    pub is_active: bool,
    /// Free-form label set by the backend; not interpreted by the client
    #[serde(default)]
    pub label: String,
}

fn default_true() -> bool {
    true
}

/// Result of an image upload. The two create endpoints answer in different
/// shapes; both are normalized to this.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UploadedProduct {
    pub id: i64,
    pub product_name: String,
    pub product_image: Option<String>,
    pub csv_file: Option<String>,
    pub message: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
pub(crate) enum UploadResponse {
    Wrapped {
        message: Option<String>,
        product: Product,
    },
    Flat(UploadedProduct),
}

impl From<UploadResponse> for UploadedProduct {
    fn from(response: UploadResponse) -> Self {
        match response {
            UploadResponse::Wrapped { message, product } => UploadedProduct {
                id: product.id,
                product_name: product.product_name,
                product_image: product.product_image,
                csv_file: product.csv_file,
                message,
            },
            UploadResponse::Flat(uploaded) => uploaded,
        }
    }
}

/// `{"message": "..."}` acknowledgement
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MessageResponse {
    #[serde(default)]
    pub message: String,
}
