use chrono::{DateTime, Utc};
use lambda_http::{Body, Response};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::errors::{ApiError, ApiResult};
use crate::responses::{created, ok, parse_body};
use crate::store::{from_document, to_document, Condition, Key, Store, StoreError, Update};

const PARTITION: &str = "VEHICLE";
const HOURS_PER_DAY_RATE: f64 = 8.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VehicleType {
    Car,
    #[serde(alias = "motorcycle")]
    Bike,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Insurance {
    pub daily_rate: f64,
    #[serde(default)]
    pub description: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Vehicle {
    pub vehicle_id: String,
    pub name: String,
    pub vehicle_type: VehicleType,
    #[serde(default)]
    pub description: String,
    pub price_per_hour: f64,
    pub price_per_day: f64,
    pub capacity: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub brand: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub year: Option<i32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fuel_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transmission: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub engine_size: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub license_plate: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub specifications: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub insurance: Option<Insurance>,
    #[serde(default)]
    pub features: Vec<String>,
    #[serde(default)]
    pub images: Vec<String>,
    #[serde(alias = "isAvailable")]
    pub available: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Vehicle {
    pub fn key(vehicle_id: &str) -> Key {
        Key::new(PARTITION, format!("VEHICLE#{}", vehicle_id))
    }
}

pub async fn load(store: &dyn Store, vehicle_id: &str) -> ApiResult<Option<Vehicle>> {
    match store.get(&Vehicle::key(vehicle_id)).await? {
        Some(item) => Ok(Some(from_document(item)?)),
        None => Ok(None),
    }
}

async fn all_vehicles(store: &dyn Store) -> ApiResult<Vec<Vehicle>> {
    let items = store.query(PARTITION, Some("VEHICLE#")).await?;
    let mut vehicles = items
        .into_iter()
        .map(from_document)
        .collect::<Result<Vec<Vehicle>, _>>()?;
    vehicles.sort_by(|a, b| a.name.cmp(&b.name));
    Ok(vehicles)
}

/// Which vehicles a listing shows
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Availability {
    Available,
    Unavailable,
    Any,
}

/// GET /vehicles and GET /vehicles/deleted
pub async fn list_vehicles(
    store: &dyn Store,
    availability: Availability,
    vehicle_type: Option<&str>,
) -> ApiResult<Response<Body>> {
    let vehicle_type = vehicle_type
        .map(|t| serde_json::from_value::<VehicleType>(Value::String(t.to_string())))
        .transpose()
        .map_err(|_| ApiError::BadRequest("type must be car or bike".to_string()))?;

    let vehicles: Vec<Vehicle> = all_vehicles(store)
        .await?
        .into_iter()
        .filter(|v| match availability {
            Availability::Available => v.available,
            Availability::Unavailable => !v.available,
            Availability::Any => true,
        })
        .filter(|v| vehicle_type.map_or(true, |t| v.vehicle_type == t))
        .collect();

    ok(&json!({ "vehicles": vehicles, "count": vehicles.len() }))
}

/// GET /vehicles/{id}
pub async fn get_vehicle(store: &dyn Store, vehicle_id: &str) -> ApiResult<Response<Body>> {
    match load(store, vehicle_id).await? {
        Some(vehicle) => ok(&vehicle),
        None => Err(ApiError::NotFound("Vehicle not found".to_string())),
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateVehicleRequest {
    pub name: Option<String>,
    pub vehicle_type: Option<VehicleType>,
    pub price_per_hour: Option<f64>,
    pub price_per_day: Option<f64>,
    pub capacity: Option<u32>,
    #[serde(default)]
    pub description: String,
    pub category: Option<String>,
    pub brand: Option<String>,
    pub model: Option<String>,
    pub year: Option<i32>,
    pub fuel_type: Option<String>,
    pub transmission: Option<String>,
    pub engine_size: Option<u32>,
    pub license_plate: Option<String>,
    pub location: Option<String>,
    pub specifications: Option<Value>,
    pub insurance: Option<Insurance>,
    #[serde(default)]
    pub features: Vec<String>,
    #[serde(default)]
    pub images: Vec<String>,
    #[serde(alias = "isAvailable")]
    pub available: Option<bool>,
}

fn required<T>(value: Option<T>, field: &str) -> ApiResult<T> {
    value.ok_or_else(|| ApiError::BadRequest(format!("{} is required", field)))
}

impl CreateVehicleRequest {
    fn into_vehicle(self, now: DateTime<Utc>) -> ApiResult<Vehicle> {
        let name = required(self.name.filter(|n| !n.trim().is_empty()), "name")?;
        let vehicle_type = required(self.vehicle_type, "vehicleType")?;
        let price_per_hour = required(self.price_per_hour, "pricePerHour")?;
        let capacity = required(self.capacity, "capacity")?;
        if price_per_hour < 0.0 || self.price_per_day.is_some_and(|p| p < 0.0) {
            return Err(ApiError::BadRequest("Prices must not be negative".to_string()));
        }

        Ok(Vehicle {
            vehicle_id: uuid::Uuid::new_v4().to_string(),
            name,
            vehicle_type,
            description: self.description,
            price_per_hour,
            price_per_day: self
                .price_per_day
                .unwrap_or(price_per_hour * HOURS_PER_DAY_RATE),
            capacity,
            category: self.category,
            brand: self.brand,
            model: self.model,
            year: self.year,
            fuel_type: self.fuel_type,
            transmission: self.transmission,
            engine_size: self.engine_size,
            license_plate: self.license_plate,
            location: self.location,
            specifications: self.specifications,
            insurance: self.insurance,
            features: self.features,
            images: self.images,
            available: self.available.unwrap_or(true),
            created_at: now,
            updated_at: now,
        })
    }
}

/// POST /vehicles
pub async fn create_vehicle(store: &dyn Store, body: &[u8]) -> ApiResult<Response<Body>> {
    let req: CreateVehicleRequest = parse_body(body)?;
    let vehicle = req.into_vehicle(Utc::now())?;

    store
        .put(
            to_document(&vehicle, &Vehicle::key(&vehicle.vehicle_id))?,
            Condition::NotExists,
        )
        .await?;

    tracing::info!("Created vehicle {} ({})", vehicle.vehicle_id, vehicle.name);
    created(&json!({ "message": "Vehicle created successfully", "vehicle": vehicle }))
}

#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VehicleUpdate {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub vehicle_type: Option<VehicleType>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub price_per_hour: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub price_per_day: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub capacity: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub brand: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub year: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fuel_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub transmission: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub engine_size: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub license_plate: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub specifications: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub insurance: Option<Insurance>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub features: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub images: Option<Vec<String>>,
    #[serde(alias = "isAvailable", skip_serializing_if = "Option::is_none")]
    pub available: Option<bool>,
}

async fn apply(store: &dyn Store, vehicle_id: &str, update: Update) -> ApiResult<Vehicle> {
    let update = update
        .set("updatedAt", Utc::now().to_rfc3339())
        .when(Condition::Exists);
    match store.update(update).await {
        Ok(item) => Ok(from_document(item)?),
        Err(StoreError::ConditionFailed) => {
            Err(ApiError::NotFound(format!("Vehicle {} not found", vehicle_id)))
        }
        Err(e) => Err(e.into()),
    }
}

/// PUT /vehicles/{id}
pub async fn update_vehicle(store: &dyn Store, vehicle_id: &str, body: &[u8]) -> ApiResult<Response<Body>> {
    let patch: VehicleUpdate = parse_body(body)?;
    if patch.name.as_deref().is_some_and(|n| n.trim().is_empty()) {
        return Err(ApiError::BadRequest("name must not be empty".to_string()));
    }

    let update = Update::new(Vehicle::key(vehicle_id)).set_fields(&patch)?;
    if update.is_empty() {
        return Err(ApiError::BadRequest("No updatable fields provided".to_string()));
    }

    let vehicle = apply(store, vehicle_id, update).await?;
    tracing::info!("Updated vehicle {}", vehicle_id);
    ok(&json!({ "message": "Vehicle updated successfully", "vehicle": vehicle }))
}

/// DELETE /vehicles/{id}: hides the vehicle from the public listing
pub async fn delete_vehicle(store: &dyn Store, vehicle_id: &str) -> ApiResult<Response<Body>> {
    let update = Update::new(Vehicle::key(vehicle_id)).set("available", false);
    apply(store, vehicle_id, update).await?;
    tracing::info!("Soft deleted vehicle {}", vehicle_id);
    ok(&json!({ "message": "Vehicle deleted successfully" }))
}

/// POST /vehicles/{id}/restore
pub async fn restore_vehicle(store: &dyn Store, vehicle_id: &str) -> ApiResult<Response<Body>> {
    let update = Update::new(Vehicle::key(vehicle_id)).set("available", true);
    let vehicle = apply(store, vehicle_id, update).await?;
    tracing::info!("Restored vehicle {}", vehicle_id);
    ok(&json!({ "message": "Vehicle restored successfully", "vehicle": vehicle }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use lambda_http::http::StatusCode;

    fn body_of(resp: &Response<Body>) -> Value {
        serde_json::from_slice(resp.body()).unwrap()
    }

    async fn add(store: &MemoryStore, name: &str, vehicle_type: &str) -> String {
        let body = json!({
            "name": name,
            "vehicleType": vehicle_type,
            "pricePerHour": 1500,
            "capacity": 4
        })
        .to_string();
        let resp = create_vehicle(store, body.as_bytes()).await.unwrap();
        body_of(&resp)["vehicle"]["vehicleId"].as_str().unwrap().to_string()
    }

    fn ids(resp: &Response<Body>) -> Vec<String> {
        body_of(resp)["vehicles"]
            .as_array()
            .unwrap()
            .iter()
            .map(|v| v["vehicleId"].as_str().unwrap().to_string())
            .collect()
    }

    #[tokio::test]
    async fn test_create_defaults_daily_price() {
        let store = MemoryStore::new();
        let id = add(&store, "Hiace", "car").await;
        let vehicle = load(&store, &id).await.unwrap().unwrap();
        assert_eq!(vehicle.price_per_day, 12000.0);
        assert!(vehicle.available);
    }

    #[tokio::test]
    async fn test_create_requires_fields() {
        let store = MemoryStore::new();
        let err = create_vehicle(&store, br#"{"name":"Hiace","vehicleType":"car","capacity":4}"#)
            .await
            .unwrap_err();
        assert_eq!(err.status(), StatusCode::BAD_REQUEST);
        assert!(err.to_string().contains("pricePerHour"));
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn test_unavailable_vehicle_moves_to_deleted_view() {
        let store = MemoryStore::new();
        let car = add(&store, "Prius", "car").await;
        let other_car = add(&store, "Alphard", "car").await;
        let bike = add(&store, "Cub", "motorcycle").await;

        update_vehicle(&store, &car, br#"{"available": false}"#).await.unwrap();

        let cars = list_vehicles(&store, Availability::Available, Some("car")).await.unwrap();
        assert_eq!(ids(&cars), vec![other_car.clone()]);

        let deleted = list_vehicles(&store, Availability::Unavailable, None).await.unwrap();
        assert_eq!(ids(&deleted), vec![car.clone()]);

        let everything = list_vehicles(&store, Availability::Any, None).await.unwrap();
        assert_eq!(body_of(&everything)["count"], 3);

        let bikes = list_vehicles(&store, Availability::Available, Some("bike")).await.unwrap();
        assert_eq!(ids(&bikes), vec![bike]);

        restore_vehicle(&store, &car).await.unwrap();
        let deleted = list_vehicles(&store, Availability::Unavailable, None).await.unwrap();
        assert!(ids(&deleted).is_empty());
    }

    #[tokio::test]
    async fn test_soft_delete_keeps_record() {
        let store = MemoryStore::new();
        let id = add(&store, "Jimny", "car").await;
        delete_vehicle(&store, &id).await.unwrap();

        let vehicle = load(&store, &id).await.unwrap().unwrap();
        assert!(!vehicle.available);
        assert_eq!(body_of(&get_vehicle(&store, &id).await.unwrap())["name"], "Jimny");
    }

    #[tokio::test]
    async fn test_missing_vehicle() {
        let store = MemoryStore::new();
        let err = update_vehicle(&store, "nope", br#"{"capacity": 2}"#).await.unwrap_err();
        assert_eq!(err.status(), StatusCode::NOT_FOUND);
        assert!(store.is_empty());

        let err = list_vehicles(&store, Availability::Available, Some("boat")).await.unwrap_err();
        assert_eq!(err.status(), StatusCode::BAD_REQUEST);
    }
}
