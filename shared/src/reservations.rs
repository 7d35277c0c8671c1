//! Reservations of a vehicle by a member.
//!
//! Stored under `RESERVATION`/`RESERVATION#<id>` with `GSI1PK` set to
//! `MEMBER#<memberId>` so a member's reservations are one index query.

use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use lambda_http::{Body, Response};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::errors::{ApiError, ApiResult};
use crate::responses::{created, ok, parse_body};
use crate::store::{
    from_document, to_document, Condition, Document, Key, Store, StoreError, Update, GSI1PK,
};
use crate::token::Claims;
use crate::users::{self, Member};
use crate::vehicles::{self, Vehicle};

const PARTITION: &str = "RESERVATION";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RentalType {
    Daily,
    Hourly,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReservationStatus {
    Pending,
    Confirmed,
    Active,
    Completed,
    Cancelled,
}

impl ReservationStatus {
    pub fn can_become(self, next: ReservationStatus) -> bool {
        use ReservationStatus::*;
        matches!(
            (self, next),
            (Pending, Confirmed)
                | (Pending, Cancelled)
                | (Confirmed, Active)
                | (Confirmed, Cancelled)
                | (Active, Completed)
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ReservationStatus::Pending => "pending",
            ReservationStatus::Confirmed => "confirmed",
            ReservationStatus::Active => "active",
            ReservationStatus::Completed => "completed",
            ReservationStatus::Cancelled => "cancelled",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Reservation {
    pub reservation_id: String,
    pub member_id: String,
    pub vehicle_id: String,
    pub vehicle_name: String,
    pub member_email: String,
    pub start_date: String,
    pub end_date: String,
    pub rental_type: RentalType,
    pub total_price: f64,
    pub status: ReservationStatus,
    #[serde(default)]
    pub notes: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Reservation {
    pub fn key(reservation_id: &str) -> Key {
        Key::new(PARTITION, format!("RESERVATION#{}", reservation_id))
    }

    fn to_item(&self) -> Result<Document, StoreError> {
        let mut item = to_document(self, &Reservation::key(&self.reservation_id))?;
        item.insert(
            GSI1PK.to_string(),
            Value::String(format!("MEMBER#{}", self.member_id)),
        );
        Ok(item)
    }

    fn visible_to(&self, claims: &Claims) -> bool {
        claims.is_admin() || claims.sub == self.member_id
    }
}

/// Accepts RFC 3339 timestamps, naive ISO date-times and plain dates
pub fn parse_moment(value: &str) -> Option<NaiveDateTime> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(value) {
        return Some(dt.naive_utc());
    }
    for format in ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%dT%H:%M"] {
        if let Ok(dt) = NaiveDateTime::parse_from_str(value, format) {
            return Some(dt);
        }
    }
    NaiveDate::parse_from_str(value, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
}

fn parse_range(start: &str, end: &str) -> ApiResult<(NaiveDateTime, NaiveDateTime)> {
    let start_at = parse_moment(start)
        .ok_or_else(|| ApiError::BadRequest(format!("Invalid startDate: {}", start)))?;
    let end_at = parse_moment(end)
        .ok_or_else(|| ApiError::BadRequest(format!("Invalid endDate: {}", end)))?;
    if end_at < start_at {
        return Err(ApiError::BadRequest(
            "endDate must not be before startDate".to_string(),
        ));
    }
    Ok((start_at, end_at))
}

/// Daily rentals count both the first and the last day
pub fn total_price(
    rental_type: RentalType,
    start: NaiveDateTime,
    end: NaiveDateTime,
    vehicle: &Vehicle,
) -> f64 {
    let span = end - start;
    match rental_type {
        RentalType::Daily => (span.num_days() + 1) as f64 * vehicle.price_per_day,
        RentalType::Hourly => span.num_seconds() as f64 / 3600.0 * vehicle.price_per_hour,
    }
}

#[derive(Debug, Default)]
pub struct ReservationQuery {
    pub member_id: Option<String>,
    pub vehicle_id: Option<String>,
    pub status: Option<String>,
}

/// GET /reservations. Members only ever see their own.
pub async fn list_reservations(
    store: &dyn Store,
    claims: &Claims,
    query: ReservationQuery,
) -> ApiResult<Response<Body>> {
    let member_id = if claims.is_admin() {
        query.member_id
    } else {
        match query.member_id {
            Some(id) if id != claims.sub => {
                return Err(ApiError::Forbidden(
                    "You can only view your own reservations".to_string(),
                ))
            }
            _ => Some(claims.sub.clone()),
        }
    };

    let items = match &member_id {
        Some(id) => store.query_index(&format!("MEMBER#{}", id)).await?,
        None => store.query(PARTITION, Some("RESERVATION#")).await?,
    };

    let mut reservations = items
        .into_iter()
        .map(from_document)
        .collect::<Result<Vec<Reservation>, _>>()?;
    reservations.retain(|r| {
        query.vehicle_id.as_deref().map_or(true, |v| r.vehicle_id == v)
            && query.status.as_deref().map_or(true, |s| r.status.as_str() == s)
    });
    reservations.sort_by(|a, b| b.created_at.cmp(&a.created_at));

    ok(&json!({ "reservations": reservations, "count": reservations.len() }))
}

async fn load(store: &dyn Store, reservation_id: &str) -> ApiResult<Reservation> {
    match store.get(&Reservation::key(reservation_id)).await? {
        Some(item) => Ok(from_document(item)?),
        None => Err(ApiError::NotFound("Reservation not found".to_string())),
    }
}

/// GET /reservations/{id}
pub async fn get_reservation(
    store: &dyn Store,
    claims: &Claims,
    reservation_id: &str,
) -> ApiResult<Response<Body>> {
    let reservation = load(store, reservation_id).await?;
    if !reservation.visible_to(claims) {
        // indistinguishable from a missing reservation
        return Err(ApiError::NotFound("Reservation not found".to_string()));
    }
    ok(&reservation)
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateReservationRequest {
    pub member_id: Option<String>,
    pub vehicle_id: Option<String>,
    pub start_date: Option<String>,
    pub end_date: Option<String>,
    pub rental_type: Option<RentalType>,
    #[serde(default)]
    pub notes: String,
}

fn required(value: Option<String>, field: &str) -> ApiResult<String> {
    value
        .filter(|v| !v.trim().is_empty())
        .ok_or_else(|| ApiError::BadRequest(format!("{} is required", field)))
}

/// POST /reservations
pub async fn create_reservation(
    store: &dyn Store,
    claims: &Claims,
    body: &[u8],
) -> ApiResult<Response<Body>> {
    let req: CreateReservationRequest = parse_body(body)?;
    let member_id = required(req.member_id, "memberId")?;
    let vehicle_id = required(req.vehicle_id, "vehicleId")?;
    let start_date = required(req.start_date, "startDate")?;
    let end_date = required(req.end_date, "endDate")?;
    let rental_type = req
        .rental_type
        .ok_or_else(|| ApiError::BadRequest("rentalType is required".to_string()))?;

    if !claims.is_admin() && claims.sub != member_id {
        return Err(ApiError::Forbidden(
            "You can only reserve for your own account".to_string(),
        ));
    }

    let (start_at, end_at) = parse_range(&start_date, &end_date)?;

    let vehicle = vehicles::load(store, &vehicle_id)
        .await?
        .ok_or_else(|| ApiError::BadRequest("Vehicle not found".to_string()))?;
    if !vehicle.available {
        return Err(ApiError::BadRequest(
            "Vehicle is not available".to_string(),
        ));
    }
    let member = users::load(store, &member_id)
        .await?
        .ok_or_else(|| ApiError::BadRequest("Member not found".to_string()))?;

    let now = Utc::now();
    let reservation = Reservation {
        reservation_id: uuid::Uuid::new_v4().to_string(),
        member_id: member.user_id.clone(),
        vehicle_id: vehicle.vehicle_id.clone(),
        vehicle_name: vehicle.name.clone(),
        member_email: member.email.clone(),
        start_date,
        end_date,
        rental_type,
        total_price: total_price(rental_type, start_at, end_at, &vehicle),
        status: ReservationStatus::Pending,
        notes: req.notes,
        created_at: now,
        updated_at: now,
    };

    store
        .put(reservation.to_item()?, Condition::NotExists)
        .await?;

    if let Err(e) = store
        .update(
            Update::new(Member::key(&member.user_id))
                .increment("statistics.totalReservations", 1)
                .when(Condition::Exists),
        )
        .await
    {
        tracing::warn!("Failed to bump reservation count for {}: {}", member.user_id, e);
    }

    tracing::info!(
        "Created reservation {} for member {} on vehicle {}",
        reservation.reservation_id,
        reservation.member_id,
        reservation.vehicle_id
    );
    created(&json!({
        "message": "Reservation created successfully",
        "reservation": reservation,
    }))
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReservationUpdate {
    pub status: Option<ReservationStatus>,
    pub notes: Option<String>,
    pub start_date: Option<String>,
    pub end_date: Option<String>,
}

/// PUT /reservations/{id}
pub async fn update_reservation(
    store: &dyn Store,
    reservation_id: &str,
    body: &[u8],
) -> ApiResult<Response<Body>> {
    let patch: ReservationUpdate = parse_body(body)?;
    let current = load(store, reservation_id).await?;

    let mut update = Update::new(Reservation::key(reservation_id));

    if let Some(next) = patch.status {
        if next != current.status {
            if !current.status.can_become(next) {
                return Err(ApiError::Conflict(format!(
                    "Cannot change reservation status from {} to {}",
                    current.status.as_str(),
                    next.as_str()
                )));
            }
            update = update.set("status", next.as_str());
        }
    }
    if let Some(notes) = patch.notes {
        update = update.set("notes", notes);
    }

    if patch.start_date.is_some() || patch.end_date.is_some() {
        let start_date = patch.start_date.unwrap_or(current.start_date.clone());
        let end_date = patch.end_date.unwrap_or(current.end_date.clone());
        let (start_at, end_at) = parse_range(&start_date, &end_date)?;

        if let Some(vehicle) = vehicles::load(store, &current.vehicle_id).await? {
            update = update.set(
                "totalPrice",
                total_price(current.rental_type, start_at, end_at, &vehicle),
            );
        }
        update = update.set("startDate", start_date).set("endDate", end_date);
    }

    if update.is_empty() {
        return Err(ApiError::BadRequest("No updatable fields provided".to_string()));
    }

    let update = update
        .set("updatedAt", Utc::now().to_rfc3339())
        .when(Condition::Exists);
    let reservation: Reservation = match store.update(update).await {
        Ok(item) => from_document(item)?,
        Err(StoreError::ConditionFailed) => {
            return Err(ApiError::NotFound("Reservation not found".to_string()))
        }
        Err(e) => return Err(e.into()),
    };

    tracing::info!("Updated reservation {}", reservation_id);
    ok(&json!({
        "message": "Reservation updated successfully",
        "reservation": reservation,
    }))
}

/// DELETE /reservations/{id}
pub async fn delete_reservation(store: &dyn Store, reservation_id: &str) -> ApiResult<Response<Body>> {
    match store
        .delete(&Reservation::key(reservation_id), Condition::Exists)
        .await
    {
        Ok(()) => {
            tracing::info!("Deleted reservation {}", reservation_id);
            ok(&json!({ "message": "Reservation deleted successfully" }))
        }
        Err(StoreError::ConditionFailed) => {
            Err(ApiError::NotFound("Reservation not found".to_string()))
        }
        Err(e) => Err(e.into()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use crate::token::{Role, TokenKind};
    use chrono::Duration;
    use lambda_http::http::StatusCode;

    fn body_of(resp: &Response<Body>) -> Value {
        serde_json::from_slice(resp.body()).unwrap()
    }

    fn claims(sub: &str, role: Role) -> Claims {
        Claims::new(sub, None, role, TokenKind::Access, Utc::now(), Duration::hours(1))
    }

    fn admin() -> Claims {
        claims("admin", Role::Administrator)
    }

    async fn fixture(store: &MemoryStore) -> (String, String) {
        let body = json!({"email": "renter@example.com", "password": "renter-pass"}).to_string();
        users::register(store, body.as_bytes()).await.unwrap();
        let member = users::find_by_email(store, "renter@example.com").await.unwrap().unwrap();

        let body = json!({
            "name": "Hiace",
            "vehicleType": "car",
            "pricePerHour": 1000,
            "pricePerDay": 7000,
            "capacity": 8
        })
        .to_string();
        let resp = vehicles::create_vehicle(store, body.as_bytes()).await.unwrap();
        let vehicle_id = body_of(&resp)["vehicle"]["vehicleId"].as_str().unwrap().to_string();
        (member.user_id, vehicle_id)
    }

    fn request(member_id: &str, vehicle_id: &str, start: &str, end: &str, rental_type: &str) -> Vec<u8> {
        json!({
            "memberId": member_id,
            "vehicleId": vehicle_id,
            "startDate": start,
            "endDate": end,
            "rentalType": rental_type
        })
        .to_string()
        .into_bytes()
    }

    #[test]
    fn test_status_transitions() {
        use ReservationStatus::*;
        assert!(Pending.can_become(Confirmed));
        assert!(Confirmed.can_become(Active));
        assert!(Active.can_become(Completed));
        assert!(!Completed.can_become(Pending));
        assert!(!Cancelled.can_become(Confirmed));
        assert!(!Pending.can_become(Completed));
    }

    #[test]
    fn test_parse_moment_formats() {
        assert!(parse_moment("2026-05-01").is_some());
        assert!(parse_moment("2026-05-01T09:30").is_some());
        assert!(parse_moment("2026-05-01T09:30:00.000Z").is_some());
        assert!(parse_moment("May 1st").is_none());
    }

    #[tokio::test]
    async fn test_daily_price_counts_both_days() {
        let store = MemoryStore::new();
        let (member_id, vehicle_id) = fixture(&store).await;
        let member = claims(&member_id, Role::Member);

        let resp = create_reservation(
            &store,
            &member,
            &request(&member_id, &vehicle_id, "2026-05-01", "2026-05-03", "daily"),
        )
        .await
        .unwrap();
        assert_eq!(resp.status(), StatusCode::CREATED);
        let reservation = body_of(&resp)["reservation"].clone();
        assert_eq!(reservation["totalPrice"], 21000.0);
        assert_eq!(reservation["status"], "pending");
        assert_eq!(reservation["vehicleName"], "Hiace");
        assert_eq!(reservation["memberEmail"], "renter@example.com");

        let stored = users::load(&store, &member_id).await.unwrap().unwrap();
        assert_eq!(stored.statistics.total_reservations, 1);
    }

    #[tokio::test]
    async fn test_hourly_price() {
        let store = MemoryStore::new();
        let (member_id, vehicle_id) = fixture(&store).await;
        let resp = create_reservation(
            &store,
            &admin(),
            &request(&member_id, &vehicle_id, "2026-05-01T09:00", "2026-05-01T12:30", "hourly"),
        )
        .await
        .unwrap();
        assert_eq!(body_of(&resp)["reservation"]["totalPrice"], 3500.0);
    }

    #[tokio::test]
    async fn test_create_validation() {
        let store = MemoryStore::new();
        let (member_id, vehicle_id) = fixture(&store).await;

        let backwards = create_reservation(
            &store,
            &admin(),
            &request(&member_id, &vehicle_id, "2026-05-03", "2026-05-01", "daily"),
        )
        .await
        .unwrap_err();
        assert_eq!(backwards.status(), StatusCode::BAD_REQUEST);

        let someone_else = create_reservation(
            &store,
            &claims("intruder", Role::Member),
            &request(&member_id, &vehicle_id, "2026-05-01", "2026-05-01", "daily"),
        )
        .await
        .unwrap_err();
        assert_eq!(someone_else.status(), StatusCode::FORBIDDEN);

        vehicles::delete_vehicle(&store, &vehicle_id).await.unwrap();
        let unavailable = create_reservation(
            &store,
            &admin(),
            &request(&member_id, &vehicle_id, "2026-05-01", "2026-05-01", "daily"),
        )
        .await
        .unwrap_err();
        assert_eq!(unavailable.status(), StatusCode::BAD_REQUEST);
        assert!(unavailable.to_string().contains("not available"));

        let unknown_member = create_reservation(
            &store,
            &admin(),
            &request("ghost", "also-ghost", "2026-05-01", "2026-05-01", "daily"),
        )
        .await
        .unwrap_err();
        assert_eq!(unknown_member.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_status_flow_and_illegal_transition() {
        let store = MemoryStore::new();
        let (member_id, vehicle_id) = fixture(&store).await;
        let resp = create_reservation(
            &store,
            &admin(),
            &request(&member_id, &vehicle_id, "2026-05-01", "2026-05-02", "daily"),
        )
        .await
        .unwrap();
        let id = body_of(&resp)["reservation"]["reservationId"]
            .as_str()
            .unwrap()
            .to_string();

        update_reservation(&store, &id, br#"{"status":"confirmed"}"#).await.unwrap();
        let err = update_reservation(&store, &id, br#"{"status":"pending"}"#)
            .await
            .unwrap_err();
        assert_eq!(err.status(), StatusCode::CONFLICT);

        let resp = update_reservation(&store, &id, br#"{"endDate":"2026-05-04","notes":"extended"}"#)
            .await
            .unwrap();
        let updated = body_of(&resp)["reservation"].clone();
        assert_eq!(updated["totalPrice"], 28000.0);
        assert_eq!(updated["status"], "confirmed");
        assert_eq!(updated["notes"], "extended");

        delete_reservation(&store, &id).await.unwrap();
        let err = delete_reservation(&store, &id).await.unwrap_err();
        assert_eq!(err.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_members_only_list_their_own() {
        let store = MemoryStore::new();
        let (member_id, vehicle_id) = fixture(&store).await;
        for day in ["2026-05-01", "2026-06-01"] {
            create_reservation(&store, &admin(), &request(&member_id, &vehicle_id, day, day, "daily"))
                .await
                .unwrap();
        }

        let own = list_reservations(&store, &claims(&member_id, Role::Member), ReservationQuery::default())
            .await
            .unwrap();
        let body = body_of(&own);
        assert_eq!(body["count"], 2);
        let list = body["reservations"].as_array().unwrap();
        let created = |i: usize| DateTime::parse_from_rfc3339(list[i]["createdAt"].as_str().unwrap()).unwrap();
        assert!(created(0) >= created(1));

        let stranger = claims("stranger", Role::Member);
        let empty = list_reservations(&store, &stranger, ReservationQuery::default())
            .await
            .unwrap();
        assert_eq!(body_of(&empty)["count"], 0);

        let prying = ReservationQuery {
            member_id: Some(member_id.clone()),
            ..Default::default()
        };
        let err = list_reservations(&store, &stranger, prying).await.unwrap_err();
        assert_eq!(err.status(), StatusCode::FORBIDDEN);

        let confirmed = ReservationQuery {
            status: Some("confirmed".to_string()),
            ..Default::default()
        };
        let none = list_reservations(&store, &admin(), confirmed).await.unwrap();
        assert_eq!(body_of(&none)["count"], 0);

        let id = list[0]["reservationId"].as_str().unwrap();
        let err = get_reservation(&store, &stranger, id).await.unwrap_err();
        assert_eq!(err.status(), StatusCode::NOT_FOUND);
        get_reservation(&store, &admin(), id).await.unwrap();
    }
}
