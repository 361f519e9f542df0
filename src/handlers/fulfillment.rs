use std::sync::Arc;

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Json},
};
use rust_decimal::Decimal;
use serde::Deserialize;
use uuid::Uuid;
use validator::Validate;

use crate::{
    errors::ServiceError,
    models::{CustomerInfo, PaymentMethod},
    services::fulfillment::{CodMethod, NewOrder},
    ApiResponse, AppState,
};

#[derive(Debug, Deserialize, Validate)]
pub struct CustomerRequest {
    #[validate(length(min = 1, max = 128, message = "customer name is required"))]
    pub name: String,
    #[validate(length(min = 7, max = 15, message = "phone must be 7-15 characters"))]
    pub phone: String,
}

#[derive(Debug, Deserialize, Validate)]
pub struct CreateOrderRequest {
    #[validate(length(min = 1, max = 64, message = "order number is required"))]
    pub order_number: String,
    pub total_amount: Decimal,
    pub payment_method: PaymentMethod,
    #[validate]
    pub customer: CustomerRequest,
}

#[derive(Debug, Deserialize)]
pub struct AgentActionRequest {
    pub agent_id: Uuid,
}

#[derive(Debug, Deserialize, Validate)]
pub struct ConfirmPickupRequest {
    pub agent_id: Uuid,
    #[validate(length(min = 1, max = 64, message = "verified order id is required"))]
    pub verified_order_id: String,
}

#[derive(Debug, Deserialize)]
pub struct CollectCodRequest {
    pub agent_id: Uuid,
    pub method: CodMethod,
}

#[derive(Debug, Deserialize)]
pub struct CompleteDeliveryRequest {
    pub agent_id: Uuid,
    pub otp: Option<String>,
    #[serde(default)]
    pub cod_collected: bool,
}

pub async fn create_order(
    State(state): State<Arc<AppState>>,
    Json(req): Json<CreateOrderRequest>,
) -> Result<impl IntoResponse, ServiceError> {
    req.validate()?;
    let order = state
        .fulfillment
        .create_order(NewOrder {
            order_number: req.order_number,
            total_amount: req.total_amount,
            payment_method: req.payment_method,
            customer: CustomerInfo {
                name: req.customer.name,
                phone: req.customer.phone,
            },
        })
        .await?;
    Ok((StatusCode::CREATED, Json(ApiResponse::success(order))))
}

pub async fn get_order(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, ServiceError> {
    let order = state.fulfillment.get_order(id).await?;
    Ok(Json(ApiResponse::success(order)))
}

pub async fn assign(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    Json(req): Json<AgentActionRequest>,
) -> Result<impl IntoResponse, ServiceError> {
    let order = state.fulfillment.assign(id, req.agent_id).await?;
    Ok(Json(ApiResponse::success(order)))
}

pub async fn accept(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    Json(req): Json<AgentActionRequest>,
) -> Result<impl IntoResponse, ServiceError> {
    let order = state.fulfillment.accept(id, req.agent_id).await?;
    Ok(Json(ApiResponse::success(order)))
}

pub async fn reach_seller_location(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    Json(req): Json<AgentActionRequest>,
) -> Result<impl IntoResponse, ServiceError> {
    let order = state
        .fulfillment
        .reach_seller_location(id, req.agent_id)
        .await?;
    Ok(Json(ApiResponse::success(order)))
}

pub async fn confirm_pickup(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    Json(req): Json<ConfirmPickupRequest>,
) -> Result<impl IntoResponse, ServiceError> {
    req.validate()?;
    let order = state
        .fulfillment
        .confirm_pickup(id, req.agent_id, &req.verified_order_id)
        .await?;
    Ok(Json(ApiResponse::success(order)))
}

pub async fn reach_buyer_location(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    Json(req): Json<AgentActionRequest>,
) -> Result<impl IntoResponse, ServiceError> {
    let order = state
        .fulfillment
        .reach_buyer_location(id, req.agent_id)
        .await?;
    Ok(Json(ApiResponse::success(order)))
}

pub async fn begin_cod_collection(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    Json(req): Json<CollectCodRequest>,
) -> Result<impl IntoResponse, ServiceError> {
    let collection = state
        .fulfillment
        .begin_cod_collection(id, req.agent_id, req.method)
        .await?;
    Ok(Json(ApiResponse::success(collection)))
}

pub async fn resend_otp(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    Json(req): Json<AgentActionRequest>,
) -> Result<impl IntoResponse, ServiceError> {
    let order = state.fulfillment.resend_otp(id, req.agent_id).await?;
    Ok(Json(ApiResponse::success(order)))
}

pub async fn complete_delivery(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    Json(req): Json<CompleteDeliveryRequest>,
) -> Result<impl IntoResponse, ServiceError> {
    let order = state
        .fulfillment
        .complete_delivery(id, req.agent_id, req.otp.as_deref(), req.cod_collected)
        .await?;
    Ok(Json(ApiResponse::success(order)))
}
