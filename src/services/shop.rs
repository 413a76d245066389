use chrono::{DateTime, Utc};
use serde_json::{json, Value};
use uuid::Uuid;

use crate::db::query::{Query, TableRef};
use crate::db::{row_as, select_as, Backend};
use crate::error::{Error, Result};
use crate::models::shop::{
    Ad, CreateAdRequest, CreateShopItemRequest, Order, OrderItem, ShopItem, UpdateAdRequest,
    UpdateShopItemRequest,
};

fn check_window(starts_at: Option<DateTime<Utc>>, ends_at: Option<DateTime<Utc>>) -> Result<()> {
    match (starts_at, ends_at) {
        (Some(start), Some(end)) if start >= end => {
            Err(Error::InvalidInput("ads must start before they end".into()))
        }
        _ => Ok(()),
    }
}

fn with_updated_at(patch: Value) -> Result<Value> {
    let Value::Object(mut obj) = patch else {
        return Err(Error::InvalidInput("expected an object".into()));
    };
    if obj.is_empty() {
        return Err(Error::InvalidInput("nothing to update".into()));
    }
    obj.insert("updated_at".into(), json!(Utc::now()));
    Ok(Value::Object(obj))
}

fn first_or_not_found<T: serde::de::DeserializeOwned>(mut rows: Vec<Value>, what: String) -> Result<T> {
    if rows.is_empty() {
        return Err(Error::NotFound(what));
    }
    row_as(rows.remove(0))
}

pub struct AdService;

impl AdService {
    pub async fn list(backend: &dyn Backend) -> Result<Vec<Ad>> {
        select_as(backend, &Query::table("ads").order_by("created_at", true)).await
    }

    pub async fn create(backend: &dyn Backend, req: &CreateAdRequest) -> Result<Ad> {
        if req.title.trim().is_empty() || req.slot.trim().is_empty() {
            return Err(Error::InvalidInput("title and slot are required".into()));
        }
        check_window(req.starts_at, req.ends_at)?;
        let row = backend.insert(&TableRef::shared("ads"), serde_json::to_value(req)?).await?;
        row_as(row)
    }

    pub async fn update(backend: &dyn Backend, id: Uuid, req: &UpdateAdRequest) -> Result<Ad> {
        let query = Query::table("ads").eq("id", id.to_string());
        if req.starts_at.is_some() || req.ends_at.is_some() {
            let current: Ad = first_or_not_found(backend.select(&query).await?, format!("ad {id}"))?;
            check_window(req.starts_at.or(current.starts_at), req.ends_at.or(current.ends_at))?;
        }
        let rows = backend.update(&query, with_updated_at(serde_json::to_value(req)?)?).await?;
        first_or_not_found(rows, format!("ad {id}"))
    }

    pub async fn delete(backend: &dyn Backend, id: Uuid) -> Result<()> {
        let rows = backend.delete(&Query::table("ads").eq("id", id.to_string())).await?;
        if rows.is_empty() {
            return Err(Error::NotFound(format!("ad {id}")));
        }
        Ok(())
    }

    /// The active ad for `slot` at `at`. No ad is an ordinary answer.
    pub async fn active_for_slot(backend: &dyn Backend, slot: &str, at: DateTime<Utc>) -> Result<Option<Ad>> {
        let query = Query::table("ads")
            .eq("slot", slot)
            .eq("is_active", true)
            .order_by("created_at", true);
        let ads: Vec<Ad> = select_as(backend, &query).await?;
        Ok(ads.into_iter().find(|ad| {
            ad.starts_at.map_or(true, |s| s <= at) && ad.ends_at.map_or(true, |e| at < e)
        }))
    }
}

pub struct ShopItemService;

impl ShopItemService {
    pub async fn list(backend: &dyn Backend, active_only: bool) -> Result<Vec<ShopItem>> {
        let mut query = Query::table("shop_items").order_by("name", false);
        if active_only {
            query = query.eq("is_active", true);
        }
        select_as(backend, &query).await
    }

    pub async fn create(backend: &dyn Backend, req: &CreateShopItemRequest) -> Result<ShopItem> {
        if req.name.trim().is_empty() {
            return Err(Error::InvalidInput("name is required".into()));
        }
        if req.price < 0.0 {
            return Err(Error::InvalidInput("price must not be negative".into()));
        }
        let row = backend
            .insert(&TableRef::shared("shop_items"), serde_json::to_value(req)?)
            .await?;
        row_as(row)
    }

    pub async fn update(backend: &dyn Backend, id: Uuid, req: &UpdateShopItemRequest) -> Result<ShopItem> {
        if req.price.is_some_and(|p| p < 0.0) {
            return Err(Error::InvalidInput("price must not be negative".into()));
        }
        let rows = backend
            .update(
                &Query::table("shop_items").eq("id", id.to_string()),
                with_updated_at(serde_json::to_value(req)?)?,
            )
            .await?;
        first_or_not_found(rows, format!("shop item {id}"))
    }

    pub async fn delete(backend: &dyn Backend, id: Uuid) -> Result<()> {
        let rows = backend.delete(&Query::table("shop_items").eq("id", id.to_string())).await?;
        if rows.is_empty() {
            return Err(Error::NotFound(format!("shop item {id}")));
        }
        Ok(())
    }
}

pub struct OrderService;

impl OrderService {
    pub async fn list(backend: &dyn Backend) -> Result<Vec<Order>> {
        select_as(backend, &Query::table("orders").order_by("created_at", true)).await
    }

    pub async fn items(backend: &dyn Backend, order_id: Uuid) -> Result<Vec<OrderItem>> {
        select_as(backend, &Query::table("order_items").eq("order_id", order_id.to_string())).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::memory::MemoryBackend;
    use chrono::Duration;

    fn ad(slot: &str, starts_at: Option<DateTime<Utc>>, ends_at: Option<DateTime<Utc>>) -> CreateAdRequest {
        CreateAdRequest {
            title: format!("{slot} ad"),
            slot: slot.into(),
            image_url: None,
            link_url: None,
            is_active: true,
            starts_at,
            ends_at,
        }
    }

    #[tokio::test]
    async fn missing_ad_is_none_not_an_error() {
        let backend = MemoryBackend::new();
        let found = AdService::active_for_slot(&backend, "home_banner", Utc::now()).await.unwrap();
        assert!(found.is_none());
    }

    #[tokio::test]
    async fn active_ad_respects_its_window() {
        let backend = MemoryBackend::new();
        let now = Utc::now();
        AdService::create(&backend, &ad("home", Some(now + Duration::days(1)), None)).await.unwrap();
        let current = AdService::create(&backend, &ad("home", Some(now - Duration::days(1)), Some(now + Duration::days(1))))
            .await
            .unwrap();

        let found = AdService::active_for_slot(&backend, "home", now).await.unwrap().unwrap();
        assert_eq!(found.id, current.id);
    }

    #[tokio::test]
    async fn inverted_window_is_rejected() {
        let backend = MemoryBackend::new();
        let now = Utc::now();
        let err = AdService::create(&backend, &ad("home", Some(now), Some(now - Duration::hours(1))))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::InvalidInput(_)));

        let created = AdService::create(&backend, &ad("home", Some(now), None)).await.unwrap();
        let update = UpdateAdRequest {
            ends_at: Some(now - Duration::hours(1)),
            ..Default::default()
        };
        assert!(AdService::update(&backend, created.id, &update).await.is_err());
    }

    #[tokio::test]
    async fn shop_items_can_be_filtered_to_active() {
        let backend = MemoryBackend::new();
        for (name, active) in [("Ball", true), ("Cones", false)] {
            let req = CreateShopItemRequest {
                name: name.into(),
                price: 10.0,
                description: None,
                image_url: None,
                stock: Some(3),
                is_active: active,
            };
            ShopItemService::create(&backend, &req).await.unwrap();
        }
        assert_eq!(ShopItemService::list(&backend, false).await.unwrap().len(), 2);
        let active = ShopItemService::list(&backend, true).await.unwrap();
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].name, "Ball");

        let missing = ShopItemService::delete(&backend, Uuid::new_v4()).await.unwrap_err();
        assert!(missing.is_not_found());
    }
}
