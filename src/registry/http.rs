use std::time::Duration;

use reqwest::header::{AUTHORIZATION, HeaderMap, HeaderValue};
use reqwest::{Response, StatusCode};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::booking::{Booking, Coordinate};
use crate::registry::{BookingRegistry, BookingResponse, RegistryError};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// REST client for the remote booking registry. The bearer credential comes
/// from the identity provider; acquiring and refreshing it is the caller's
/// problem.
pub struct HttpRegistry {
    client: reqwest::Client,
    base_url: String,
}

#[derive(Serialize)]
struct RespondBody<'a> {
    driver_id: Uuid,
    #[serde(flatten)]
    response: &'a BookingResponse,
}

#[derive(Serialize)]
struct CompleteBody {
    driver_id: Uuid,
    lat: f64,
    lng: f64,
}

#[derive(Serialize)]
struct CancelBody<'a> {
    driver_id: Uuid,
    reason: &'a str,
}

#[derive(Deserialize)]
struct ErrorBody {
    code: Option<String>,
    error: Option<String>,
    remaining_m: Option<f64>,
}

impl HttpRegistry {
    pub fn new(base_url: &str, bearer_token: &str) -> Result<Self, RegistryError> {
        let mut auth = HeaderValue::from_str(&format!("Bearer {bearer_token}"))
            .map_err(|err| RegistryError::Invalid(format!("invalid bearer token: {err}")))?;
        auth.set_sensitive(true);

        let mut headers = HeaderMap::new();
        headers.insert(AUTHORIZATION, auth);

        let client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .default_headers(headers)
            .build()
            .map_err(|err| RegistryError::Network(format!("client build failed: {err}")))?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{path}", self.base_url)
    }

    async fn decode<T: serde::de::DeserializeOwned>(
        response: Response,
    ) -> Result<T, RegistryError> {
        let status = response.status();
        if status.is_success() {
            return response
                .json::<T>()
                .await
                .map_err(|err| RegistryError::Network(format!("bad response body: {err}")));
        }

        let body = response.json::<ErrorBody>().await.unwrap_or(ErrorBody {
            code: None,
            error: None,
            remaining_m: None,
        });
        Err(map_error(status, body))
    }
}

fn map_error(status: StatusCode, body: ErrorBody) -> RegistryError {
    match body.code.as_deref() {
        Some("already_claimed") => return RegistryError::AlreadyClaimed,
        Some("not_found") => return RegistryError::NotFound,
        Some("not_active") => return RegistryError::NotActive,
        Some("too_far") => {
            return RegistryError::TooFar {
                remaining_m: body.remaining_m.unwrap_or(f64::INFINITY),
            };
        }
        _ => {}
    }

    let message = body.error.unwrap_or_else(|| status.to_string());
    match status {
        StatusCode::NOT_FOUND => RegistryError::NotFound,
        StatusCode::CONFLICT => RegistryError::AlreadyClaimed,
        StatusCode::BAD_REQUEST | StatusCode::UNPROCESSABLE_ENTITY => {
            RegistryError::Invalid(message)
        }
        _ => RegistryError::Network(format!("registry returned {status}: {message}")),
    }
}

fn transport(err: reqwest::Error) -> RegistryError {
    RegistryError::Network(err.to_string())
}

impl BookingRegistry for HttpRegistry {
    async fn list_nearby(
        &self,
        center: Coordinate,
        radius_km: f64,
    ) -> Result<Vec<Booking>, RegistryError> {
        let response = self
            .client
            .get(self.url("/bookings/nearby"))
            .query(&[
                ("lat", center.lat),
                ("lng", center.lng),
                ("radius_km", radius_km),
            ])
            .send()
            .await
            .map_err(transport)?;

        Self::decode(response).await
    }

    async fn respond(
        &self,
        driver_id: Uuid,
        booking_id: Uuid,
        response: BookingResponse,
    ) -> Result<Booking, RegistryError> {
        let response = self
            .client
            .post(self.url(&format!("/bookings/{booking_id}/respond")))
            .json(&RespondBody {
                driver_id,
                response: &response,
            })
            .send()
            .await
            .map_err(transport)?;

        Self::decode(response).await
    }

    async fn complete(
        &self,
        driver_id: Uuid,
        booking_id: Uuid,
        position: Coordinate,
    ) -> Result<Booking, RegistryError> {
        let response = self
            .client
            .post(self.url(&format!("/bookings/{booking_id}/complete")))
            .json(&CompleteBody {
                driver_id,
                lat: position.lat,
                lng: position.lng,
            })
            .send()
            .await
            .map_err(transport)?;

        Self::decode(response).await
    }

    async fn cancel(
        &self,
        driver_id: Uuid,
        booking_id: Uuid,
        reason: &str,
    ) -> Result<(), RegistryError> {
        let response = self
            .client
            .post(self.url(&format!("/bookings/{booking_id}/cancel")))
            .json(&CancelBody { driver_id, reason })
            .send()
            .await
            .map_err(transport)?;

        let status = response.status();
        if status.is_success() {
            return Ok(());
        }

        let body = response.json::<ErrorBody>().await.unwrap_or(ErrorBody {
            code: None,
            error: None,
            remaining_m: None,
        });
        Err(map_error(status, body))
    }

    async fn active_for_driver(&self, driver_id: Uuid) -> Result<Option<Booking>, RegistryError> {
        let response = self
            .client
            .get(self.url(&format!("/drivers/{driver_id}/active")))
            .send()
            .await
            .map_err(transport)?;

        match response.status() {
            StatusCode::NO_CONTENT | StatusCode::NOT_FOUND => Ok(None),
            _ => Self::decode(response).await.map(Some),
        }
    }
}
