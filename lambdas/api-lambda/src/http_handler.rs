use lambda_http::{http::Method, Body, Error, Request, RequestExt, Response};
use rental_shared::errors::{ApiError, ApiResult};
use rental_shared::reservations::ReservationQuery;
use rental_shared::token::Claims;
use rental_shared::users::ListUsersQuery;
use rental_shared::vehicles::Availability;
use rental_shared::{
    announcements, auth, reservations, responses, site_settings, users, vehicles, AppState,
};
use std::sync::Arc;

/// Main Lambda handler - routes every REST resource
pub(crate) async fn function_handler(
    event: Request,
    state: Arc<AppState>,
) -> Result<Response<Body>, Error> {
    tracing::info!(
        "API Lambda invoked - Method: {} Path: {}",
        event.method(),
        event.uri().path()
    );

    match route(&event, &state).await {
        Ok(resp) => Ok(resp),
        Err(err) => {
            if !err.status().is_server_error() {
                tracing::info!("Request rejected with {}: {}", err.status(), err);
            }
            err.into_response()
        }
    }
}

/// Claims of a valid access token
fn caller(event: &Request, state: &AppState) -> ApiResult<Claims> {
    auth::authenticate(event.headers(), &state.config)
}

fn admin(event: &Request, state: &AppState) -> ApiResult<Claims> {
    let claims = caller(event, state)?;
    auth::require_admin(&claims)?;
    Ok(claims)
}

/// Access token of a member who is still active, or of an administrator
async fn active_caller(event: &Request, state: &AppState) -> ApiResult<Claims> {
    let claims = caller(event, state)?;
    auth::require_active(state.store.as_ref(), &claims).await?;
    Ok(claims)
}

fn not_found(method: &Method, path: &str) -> ApiResult<Response<Body>> {
    tracing::warn!("No route for {} {}", method, path);
    Err(ApiError::NotFound("Not found".to_string()))
}

async fn route(event: &Request, state: &AppState) -> ApiResult<Response<Body>> {
    let method = event.method();
    let path = event.uri().path();

    // Handle CORS preflight
    if method == Method::OPTIONS {
        return responses::preflight();
    }

    let body: &[u8] = event.body();
    let params = event.query_string_parameters();
    let store = state.store.as_ref();
    let config = &state.config;
    let parts: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();

    match (method, parts.as_slice()) {
        // --- AUTH ---
        (&Method::POST, ["auth"]) => auth::admin_login(store, config, body).await,
        (&Method::POST, ["auth", "login"]) => auth::member_login(store, config, body).await,
        (&Method::POST, ["auth", "refresh"]) => auth::refresh(store, config, body).await,
        (&Method::POST, ["auth", "forgot-password"]) => {
            auth::forgot_password(store, state.mailer.as_ref(), config, body).await
        }
        (&Method::POST, ["auth", "reset-password"]) => auth::reset_password(store, body).await,

        // --- USERS ---
        (&Method::POST, ["users"]) => users::register(store, body).await,
        (&Method::GET, ["users"]) => {
            admin(event, state)?;
            match params.first("email") {
                Some(email) => users::get_user_by_email(store, email).await,
                None => {
                    let limit = params
                        .first("limit")
                        .map(|l| l.parse::<i32>())
                        .transpose()
                        .map_err(|_| ApiError::BadRequest("limit must be a number".to_string()))?;
                    let query = ListUsersQuery {
                        limit,
                        next_token: params.first("nextToken").map(str::to_string),
                        member_type: params.first("memberType").map(str::to_string),
                        status: params.first("status").map(str::to_string),
                    };
                    users::list_users(store, &query).await
                }
            }
        }
        (&Method::GET, ["users", user_id]) => {
            let claims = caller(event, state)?;
            users::get_user(store, &claims, user_id).await
        }

        // --- MEMBERS ---
        (&Method::GET, ["members"]) => {
            admin(event, state)?;
            let query = ListUsersQuery {
                member_type: params.first("memberType").map(str::to_string),
                status: params.first("status").map(str::to_string),
                ..Default::default()
            };
            users::list_members(store, &query).await
        }
        (&Method::GET, ["members", user_id]) => {
            let claims = admin(event, state)?;
            users::get_user(store, &claims, user_id).await
        }
        (&Method::PUT, ["members", user_id]) => {
            admin(event, state)?;
            users::update_member(store, user_id, body).await
        }
        (&Method::DELETE, ["members", user_id]) => {
            admin(event, state)?;
            users::deactivate_member(store, user_id).await
        }

        // --- VEHICLES ---
        (&Method::GET, ["vehicles"]) => {
            let availability = if params.first("includeUnavailable") == Some("true") {
                admin(event, state)?;
                Availability::Any
            } else {
                Availability::Available
            };
            vehicles::list_vehicles(store, availability, params.first("type")).await
        }
        (&Method::GET, ["vehicles", "deleted"]) => {
            admin(event, state)?;
            vehicles::list_vehicles(store, Availability::Unavailable, params.first("type")).await
        }
        (&Method::GET, ["vehicles", vehicle_id]) => vehicles::get_vehicle(store, vehicle_id).await,
        (&Method::POST, ["vehicles"]) => {
            admin(event, state)?;
            vehicles::create_vehicle(store, body).await
        }
        (&Method::PUT, ["vehicles", vehicle_id]) => {
            admin(event, state)?;
            vehicles::update_vehicle(store, vehicle_id, body).await
        }
        (&Method::DELETE, ["vehicles", vehicle_id]) => {
            admin(event, state)?;
            vehicles::delete_vehicle(store, vehicle_id).await
        }
        (&Method::POST, ["vehicles", vehicle_id, "restore"]) => {
            admin(event, state)?;
            vehicles::restore_vehicle(store, vehicle_id).await
        }

        // --- RESERVATIONS ---
        (&Method::GET, ["reservations"]) => {
            let claims = active_caller(event, state).await?;
            let query = ReservationQuery {
                member_id: params.first("memberId").map(str::to_string),
                vehicle_id: params.first("vehicleId").map(str::to_string),
                status: params.first("status").map(str::to_string),
            };
            reservations::list_reservations(store, &claims, query).await
        }
        (&Method::GET, ["reservations", reservation_id]) => {
            let claims = active_caller(event, state).await?;
            reservations::get_reservation(store, &claims, reservation_id).await
        }
        (&Method::POST, ["reservations"]) => {
            let claims = active_caller(event, state).await?;
            reservations::create_reservation(store, &claims, body).await
        }
        (&Method::PUT, ["reservations", reservation_id]) => {
            admin(event, state)?;
            reservations::update_reservation(store, reservation_id, body).await
        }
        (&Method::DELETE, ["reservations", reservation_id]) => {
            admin(event, state)?;
            reservations::delete_reservation(store, reservation_id).await
        }

        // --- ANNOUNCEMENTS ---
        (&Method::GET, ["announcements"]) => {
            let include_drafts = params.first("all") == Some("true");
            if include_drafts {
                admin(event, state)?;
            }
            announcements::list_announcements(store, include_drafts).await
        }
        (&Method::GET, ["announcements", id]) => {
            // drafts are only visible to an administrator
            let include_drafts = caller(event, state).is_ok_and(|c| c.is_admin());
            announcements::get_announcement(store, id, include_drafts).await
        }
        (&Method::POST, ["announcements"]) => {
            admin(event, state)?;
            announcements::create_announcement(store, body).await
        }
        (&Method::PUT, ["announcements", id]) => {
            admin(event, state)?;
            announcements::update_announcement(store, id, body).await
        }
        (&Method::DELETE, ["announcements", id]) => {
            admin(event, state)?;
            announcements::delete_announcement(store, id).await
        }

        // --- SITE SETTINGS ---
        (&Method::GET, ["site-settings"]) => site_settings::list_settings(store).await,
        (&Method::POST, ["site-settings", "icon"]) => {
            admin(event, state)?;
            site_settings::upload_icon(store, state.assets.as_ref(), body).await
        }
        (&Method::GET, ["site-settings", key]) => site_settings::get_setting(store, key).await,
        (&Method::POST, ["site-settings"]) => {
            admin(event, state)?;
            site_settings::put_setting(store, None, body).await
        }
        (&Method::PUT | &Method::POST, ["site-settings", key]) => {
            admin(event, state)?;
            site_settings::put_setting(store, Some(*key), body).await
        }
        (&Method::DELETE, ["site-settings", key]) => {
            admin(event, state)?;
            site_settings::delete_setting(store, key).await
        }

        _ => not_found(method, path),
    }
}
