//! Notification texts for each trigger rule.

use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::models::Notice;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Locale {
    #[default]
    En,
    Es,
}

impl FromStr for Locale {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "en" => Ok(Locale::En),
            "es" => Ok(Locale::Es),
            other => Err(format!("unsupported locale '{}' (expected en or es)", other)),
        }
    }
}

pub fn new_message(locale: Locale, content: &str) -> Notice {
    let title = match locale {
        Locale::En => "New message",
        Locale::Es => "Nuevo mensaje",
    };
    Notice::new(title, content)
}

pub fn new_sale(locale: Locale, buyer_name: Option<&str>) -> Notice {
    match locale {
        Locale::En => Notice::new(
            "New sale",
            format!("{} bought your product.", buyer_name.unwrap_or("someone")),
        ),
        Locale::Es => Notice::new(
            "¡Tienes una nueva venta!",
            format!(
                "El usuario {} compró tu producto.",
                buyer_name.unwrap_or("alguien")
            ),
        ),
    }
}

pub fn purchase_completed(locale: Locale, product_title: Option<&str>) -> Notice {
    match locale {
        Locale::En => Notice::new(
            "Purchase completed",
            format!("You purchased {}.", product_title.unwrap_or("a product")),
        ),
        Locale::Es => Notice::new(
            "¡Compra realizada!",
            format!("Has comprado {}.", product_title.unwrap_or("un producto")),
        ),
    }
}

pub fn product_favorited(locale: Locale) -> Notice {
    match locale {
        Locale::En => Notice::new(
            "Product favorited",
            "Someone added your product to favorites.",
        ),
        Locale::Es => Notice::new(
            "¡Producto agregado a favoritos!",
            "Alguien agregó tu producto a favoritos.",
        ),
    }
}

pub fn product_published(locale: Locale, title: Option<&str>) -> Notice {
    match locale {
        Locale::En => Notice::new(
            "New product published",
            format!("{} is now available.", title.unwrap_or("A product")),
        ),
        Locale::Es => Notice::new(
            "¡Nuevo producto publicado!",
            format!("{} ya está disponible.", title.unwrap_or("Un producto")),
        ),
    }
}
