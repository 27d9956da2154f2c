use chrono::Utc;
use metrics::counter;
use rust_decimal::Decimal;
use sea_orm::{
    ActiveModelTrait, ActiveValue::Set, ColumnTrait, ConnectionTrait, EntityTrait,
    IntoActiveModel, PaginatorTrait, QueryFilter, QueryOrder, TransactionTrait,
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;
use tracing::{info, instrument, warn};
use utoipa::ToSchema;
use uuid::Uuid;
use validator::Validate;

use crate::auth::AuthUser;
use crate::config::AppConfig;
use crate::db::DbPool;
use crate::entities::order::{self, OrderPaymentStatus, OrderStatus};
use crate::entities::payment::{self, PaymentStatus, RefundStatus};
use crate::errors::ServiceError;
use crate::events::{Event, EventSender};
use crate::gateway::{self, PaymentGateway};
use crate::services::orders::{guarded_order_update, status_change_fields};

pub const COD_METHOD: &str = "cash_on_delivery";
pub const VERIFY_COD_PATH: &str = "/api/v1/payments/verify-cod";

#[derive(Debug, Clone, Deserialize, ToSchema)]
pub struct PaymentMethodSpec {
    /// e.g. `upi`, `credit_card`, `cash_on_delivery`.
    #[serde(rename = "type")]
    pub method_type: String,
    /// Gateway override; defaults to the configured provider.
    pub gateway: Option<String>,
}

#[derive(Debug, Clone, Deserialize, ToSchema)]
pub struct InitializePayment {
    pub order_id: Uuid,
    pub payment_method: PaymentMethodSpec,
    /// Acknowledged only; profile storage belongs to the identity service.
    #[serde(default)]
    pub save_payment_method: bool,
}

#[derive(Debug, Clone, Deserialize, ToSchema)]
pub struct VerifyPayment {
    pub payment_id: Uuid,
    pub gateway_payment_id: Option<String>,
    pub gateway_order_id: Option<String>,
    pub gateway_signature: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Validate, ToSchema)]
pub struct RefundRequest {
    #[validate(length(min = 1, message = "A refund reason is required"))]
    pub reason: String,
    /// Defaults to the full payment amount.
    pub amount: Option<Decimal>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum RefundDecision {
    Processed,
    Failed,
}

#[derive(Debug, Clone, Deserialize, ToSchema)]
pub struct ProcessRefund {
    pub status: RefundDecision,
    pub refund_id: Option<String>,
    pub notes: Option<String>,
}

/// Parameters the client SDK needs to run the gateway checkout.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct CheckoutParams {
    pub gateway_order_id: String,
    pub amount: i64,
    pub currency: String,
    pub key_id: String,
}

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct PaymentInitOutcome {
    pub payment: payment::Model,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub checkout: Option<CheckoutParams>,
    /// For COD: the endpoint that confirms the order as a separate step.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub next_step: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct WebhookEnvelope {
    pub event: String,
    #[serde(default)]
    pub payload: serde_json::Value,
}

/// Coordinates Payment and Order records. All two-record writes happen in
/// one transaction; gateway calls are sequenced outside transactions so a
/// failed call leaves the Payment safely `pending`.
#[derive(Clone)]
pub struct PaymentService {
    db: DbPool,
    gateway: Arc<dyn PaymentGateway>,
    events: EventSender,
    currency: String,
    key_id: String,
    key_secret: String,
    webhook_secret: String,
    relaxed_refunds: bool,
    production: bool,
}

/// Guarded write, same discipline as orders: zero affected rows means a
/// concurrent writer won and the caller must retry against fresh state.
async fn guarded_payment_update<C: ConnectionTrait>(
    conn: &C,
    current: &payment::Model,
    mut fields: payment::ActiveModel,
) -> Result<(), ServiceError> {
    fields.updated_at = Set(Utc::now());
    fields.version = Set(current.version + 1);
    let result = payment::Entity::update_many()
        .set(fields)
        .filter(payment::Column::Id.eq(current.id))
        .filter(payment::Column::Version.eq(current.version))
        .exec(conn)
        .await?;
    if result.rows_affected == 0 {
        return Err(ServiceError::ConcurrentModification(current.id));
    }
    Ok(())
}

fn merge_metadata(existing: &Option<serde_json::Value>, patch: serde_json::Value) -> serde_json::Value {
    let mut merged = existing.clone().unwrap_or_else(|| json!({}));
    if let (Some(obj), Some(patch_obj)) = (merged.as_object_mut(), patch.as_object()) {
        for (k, v) in patch_obj {
            obj.insert(k.clone(), v.clone());
        }
        return merged;
    }
    patch
}

fn refund_details(payment: &payment::Model) -> serde_json::Value {
    json!({
        "refund_status": payment.refund_status,
        "refund_amount": payment.refund_amount,
        "refund_id": payment.refund_id,
        "refund_reason": payment.refund_reason,
    })
}

impl PaymentService {
    pub fn new(
        db: DbPool,
        gateway: Arc<dyn PaymentGateway>,
        events: EventSender,
        config: &AppConfig,
    ) -> Self {
        Self {
            db,
            gateway,
            events,
            currency: config.payments.currency.clone(),
            key_id: config.gateway.key_id.clone(),
            key_secret: config.gateway.key_secret.clone(),
            webhook_secret: config.gateway.webhook_secret.clone(),
            relaxed_refunds: config.relaxed_refunds(),
            production: config.is_production(),
        }
    }

    async fn find_payment(&self, payment_id: Uuid) -> Result<payment::Model, ServiceError> {
        payment::Entity::find_by_id(payment_id)
            .one(&self.db)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("Payment {payment_id} not found")))
    }

    fn check_payment_access(
        payment: &payment::Model,
        actor: &AuthUser,
    ) -> Result<(), ServiceError> {
        if payment.user_id == actor.id || actor.is_admin() {
            Ok(())
        } else {
            Err(ServiceError::Forbidden(
                "You do not have access to this payment".into(),
            ))
        }
    }

    async fn find_order<C: ConnectionTrait>(
        conn: &C,
        order_id: Uuid,
    ) -> Result<order::Model, ServiceError> {
        order::Entity::find_by_id(order_id)
            .one(conn)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("Order {order_id} not found")))
    }

    pub async fn get_payment(
        &self,
        payment_id: Uuid,
        actor: &AuthUser,
    ) -> Result<payment::Model, ServiceError> {
        let payment = self.find_payment(payment_id).await?;
        Self::check_payment_access(&payment, actor)?;
        Ok(payment)
    }

    pub async fn list_payments(
        &self,
        actor: &AuthUser,
        status: Option<PaymentStatus>,
        method: Option<String>,
        page: u64,
        per_page: u64,
    ) -> Result<(Vec<payment::Model>, u64), ServiceError> {
        let mut query = payment::Entity::find().filter(payment::Column::UserId.eq(actor.id));
        if let Some(status) = status {
            query = query.filter(payment::Column::Status.eq(status));
        }
        if let Some(method) = method {
            query = query.filter(payment::Column::PaymentMethod.eq(method));
        }
        let paginator = query
            .order_by_desc(payment::Column::CreatedAt)
            .paginate(&self.db, per_page.max(1));
        let total = paginator.num_items().await?;
        let payments = paginator.fetch_page(page.saturating_sub(1)).await?;
        Ok((payments, total))
    }

    /// Create a Payment for an order and, for online methods, a gateway
    /// intent. The Payment row commits before the gateway call so a gateway
    /// failure leaves it `pending` and retryable.
    #[instrument(skip(self, actor, input), fields(order_id = %input.order_id))]
    pub async fn initialize_payment(
        &self,
        actor: &AuthUser,
        input: InitializePayment,
    ) -> Result<PaymentInitOutcome, ServiceError> {
        let order = Self::find_order(&self.db, input.order_id).await?;
        if order.user_id != actor.id && !actor.is_admin() {
            return Err(ServiceError::Forbidden(
                "You can only pay for your own orders".into(),
            ));
        }
        if order.payment_status == OrderPaymentStatus::Paid {
            return Err(ServiceError::conflict("This order is already paid"));
        }

        let now = Utc::now();
        let payment_model = payment::Model {
            id: Uuid::new_v4(),
            user_id: order.user_id,
            order_id: order.id,
            amount: order.total_amount,
            currency: self.currency.clone(),
            payment_method: input.payment_method.method_type.clone(),
            payment_gateway: input
                .payment_method
                .gateway
                .clone()
                .unwrap_or_else(|| "razorpay".to_string()),
            status: PaymentStatus::Pending,
            gateway_order_id: None,
            gateway_payment_id: None,
            gateway_signature: None,
            refund_status: RefundStatus::None,
            refund_amount: None,
            refund_reason: None,
            refund_id: None,
            error_message: None,
            error_code: None,
            notes: None,
            metadata: None,
            created_at: now,
            updated_at: now,
            version: 1,
        };

        let txn = self.db.begin().await?;
        let active = payment_model.clone().into_active_model().reset_all();
        payment::Entity::insert(active).exec(&txn).await?;
        guarded_order_update(
            &txn,
            &order,
            order::ActiveModel {
                payment_id: Set(Some(payment_model.id)),
                ..Default::default()
            },
        )
        .await?;
        txn.commit().await?;

        if input.save_payment_method {
            info!(user_id = %order.user_id, "payment method profile requested, deferred to identity service");
        }
        self.events.send(Event::PaymentInitialized {
            payment_id: payment_model.id,
            order_id: order.id,
        });
        counter!("payments.initialized", 1);

        if payment_model.payment_method == COD_METHOD {
            return Ok(PaymentInitOutcome {
                payment: payment_model,
                checkout: None,
                next_step: Some(VERIFY_COD_PATH.to_string()),
            });
        }

        // Gateway intent, outside any transaction. On failure the Payment
        // stays pending and the caller gets a retryable 502.
        let receipt = payment_model.id.to_string();
        let gateway_order = self
            .gateway
            .create_order(payment_model.amount, &self.currency, &receipt)
            .await?;

        let metadata = merge_metadata(
            &payment_model.metadata,
            json!({
                "gateway_order": {
                    "id": gateway_order.id,
                    "amount": gateway_order.amount,
                    "currency": gateway_order.currency,
                    "receipt": receipt,
                }
            }),
        );
        guarded_payment_update(
            &self.db,
            &payment_model,
            payment::ActiveModel {
                gateway_order_id: Set(Some(gateway_order.id.clone())),
                metadata: Set(Some(metadata)),
                ..Default::default()
            },
        )
        .await?;
        let payment = self.find_payment(payment_model.id).await?;

        Ok(PaymentInitOutcome {
            checkout: Some(CheckoutParams {
                gateway_order_id: gateway_order.id,
                amount: gateway::to_minor_units(payment.amount)?,
                currency: payment.currency.clone(),
                key_id: self.key_id.clone(),
            }),
            payment,
            next_step: None,
        })
    }

    /// Explicit COD confirmation: payment stays `pending` until delivery,
    /// the order moves to `confirmed`. Idempotent.
    #[instrument(skip(self, actor))]
    pub async fn verify_cod(
        &self,
        actor: &AuthUser,
        payment_id: Uuid,
    ) -> Result<payment::Model, ServiceError> {
        let payment = self.find_payment(payment_id).await?;
        Self::check_payment_access(&payment, actor)?;
        if payment.payment_method != COD_METHOD {
            return Err(ServiceError::ValidationError(
                "This payment is not cash on delivery".into(),
            ));
        }
        if payment.status != PaymentStatus::Pending {
            return Err(ServiceError::conflict(format!(
                "Cash payment in status {} cannot be confirmed",
                payment.status
            )));
        }

        let order = Self::find_order(&self.db, payment.order_id).await?;
        if order.status == OrderStatus::Pending {
            let fields = status_change_fields(
                &order,
                OrderStatus::Confirmed,
                Some(actor.id),
                Some("Cash on delivery confirmed".to_string()),
            );
            guarded_order_update(&self.db, &order, fields).await?;
            self.events.send(Event::OrderStatusChanged {
                order_id: order.id,
                from: OrderStatus::Pending,
                to: OrderStatus::Confirmed,
            });
        }
        Ok(payment)
    }

    /// Client-initiated verification of an online payment via the checkout
    /// signature.
    #[instrument(skip(self, actor, input), fields(payment_id = %input.payment_id))]
    pub async fn verify_payment(
        &self,
        actor: &AuthUser,
        input: VerifyPayment,
    ) -> Result<payment::Model, ServiceError> {
        let payment = self.find_payment(input.payment_id).await?;
        Self::check_payment_access(&payment, actor)?;

        if payment.payment_method == COD_METHOD {
            return self.verify_cod(actor, payment.id).await;
        }
        if payment.status == PaymentStatus::Completed {
            return Ok(payment);
        }

        let gateway_payment_id = input.gateway_payment_id.clone().ok_or_else(|| {
            ServiceError::ValidationError("gateway_payment_id is required".into())
        })?;
        let gateway_order_id = input
            .gateway_order_id
            .clone()
            .or_else(|| payment.gateway_order_id.clone())
            .ok_or_else(|| {
                ServiceError::ValidationError("No gateway order is associated with this payment".into())
            })?;

        let mut test_signature = None;
        let signature = match input.gateway_signature.clone() {
            Some(s) => s,
            None if !self.production => {
                // Sandboxed checkouts may omit the signature; derive the
                // expected one and record that this verification was relaxed.
                let derived =
                    gateway::payment_signature(&self.key_secret, &gateway_order_id, &gateway_payment_id);
                test_signature = Some(derived.clone());
                derived
            }
            None => {
                return Err(ServiceError::ValidationError(
                    "gateway_signature is required".into(),
                ))
            }
        };

        let valid = gateway::verify_payment_signature(
            &self.key_secret,
            &gateway_order_id,
            &gateway_payment_id,
            &signature,
        );

        if !valid {
            // Record the failure, but never demote a payment a concurrent
            // writer already completed or refunded.
            if payment.status.can_transition_to(PaymentStatus::Failed) {
                let txn = self.db.begin().await?;
                guarded_payment_update(
                    &txn,
                    &payment,
                    payment::ActiveModel {
                        status: Set(PaymentStatus::Failed),
                        gateway_payment_id: Set(Some(gateway_payment_id)),
                        error_message: Set(Some("Payment signature verification failed".into())),
                        error_code: Set(Some("SIGNATURE_MISMATCH".into())),
                        ..Default::default()
                    },
                )
                .await?;
                txn.commit().await?;
                self.events.send(Event::PaymentStatusChanged {
                    payment_id: payment.id,
                    from: payment.status,
                    to: PaymentStatus::Failed,
                });
            }
            counter!("payments.verification_failed", 1);
            return Err(ServiceError::SignatureError(
                "Payment signature verification failed".into(),
            ));
        }

        // Same rank guard as the webhook path: a payment that was refunded
        // or cancelled while the client held this signature stays terminal.
        if !payment.status.can_transition_to(PaymentStatus::Completed) {
            return Ok(payment);
        }

        let txn = self.db.begin().await?;
        let order = Self::find_order(&txn, payment.order_id).await?;
        let metadata = test_signature
            .map(|sig| merge_metadata(&payment.metadata, json!({ "test_signature": sig })));
        let mut fields = payment::ActiveModel {
            status: Set(PaymentStatus::Completed),
            gateway_payment_id: Set(Some(gateway_payment_id)),
            gateway_signature: Set(Some(signature)),
            ..Default::default()
        };
        if let Some(metadata) = metadata {
            fields.metadata = Set(Some(metadata));
        }
        guarded_payment_update(&txn, &payment, fields).await?;
        if order.payment_status.can_transition_to(OrderPaymentStatus::Paid) {
            guarded_order_update(
                &txn,
                &order,
                order::ActiveModel {
                    payment_status: Set(OrderPaymentStatus::Paid),
                    ..Default::default()
                },
            )
            .await?;
        }
        txn.commit().await?;

        self.events.send(Event::PaymentStatusChanged {
            payment_id: payment.id,
            from: payment.status,
            to: PaymentStatus::Completed,
        });
        counter!("payments.completed", 1);
        self.find_payment(payment.id).await
    }

    /// Customer-facing refund request.
    #[instrument(skip(self, actor, request))]
    pub async fn request_refund(
        &self,
        actor: &AuthUser,
        payment_id: Uuid,
        request: RefundRequest,
    ) -> Result<payment::Model, ServiceError> {
        request.validate()?;
        let payment = self.find_payment(payment_id).await?;
        Self::check_payment_access(&payment, actor)?;

        if payment.status == PaymentStatus::Refunded {
            return Err(ServiceError::conflict_with(
                "This payment has already been refunded",
                refund_details(&payment),
            ));
        }
        let refundable: &[PaymentStatus] = if self.relaxed_refunds {
            &[
                PaymentStatus::Completed,
                PaymentStatus::Pending,
                PaymentStatus::Processing,
            ]
        } else {
            &[PaymentStatus::Completed]
        };
        if !refundable.contains(&payment.status) {
            return Err(ServiceError::conflict_with(
                format!("Payment in status {} is not refundable", payment.status),
                json!({ "refundable_statuses": refundable }),
            ));
        }
        if payment.refund_status != RefundStatus::None {
            return Err(ServiceError::conflict_with(
                "A refund has already been requested for this payment",
                refund_details(&payment),
            ));
        }

        let amount = request.amount.unwrap_or(payment.amount);
        if amount <= Decimal::ZERO || amount > payment.amount {
            return Err(ServiceError::ValidationError(format!(
                "Refund amount must be between 0 and {}",
                payment.amount
            )));
        }

        // Captured through the gateway: refund there first, then commit.
        if let Some(gateway_payment_id) = payment.gateway_payment_id.clone() {
            match self
                .gateway
                .create_refund(&gateway_payment_id, amount, Some(&request.reason))
                .await
            {
                Ok(refund) => {
                    self.apply_refund_outcome(
                        &payment,
                        amount,
                        Some(request.reason),
                        Some(refund.id.clone()),
                        None,
                        Some(actor.id),
                    )
                    .await?;
                    self.events.send(Event::RefundProcessed {
                        payment_id: payment.id,
                        refund_id: Some(refund.id),
                    });
                    counter!("refunds.processed", 1);
                }
                Err(err) => {
                    warn!(payment_id = %payment.id, error = %err, "gateway refund failed");
                    guarded_payment_update(
                        &self.db,
                        &payment,
                        payment::ActiveModel {
                            refund_status: Set(RefundStatus::Failed),
                            refund_reason: Set(Some(request.reason)),
                            error_message: Set(Some(format!("Refund failed: {err}"))),
                            ..Default::default()
                        },
                    )
                    .await?;
                    self.events.send(Event::RefundFailed {
                        payment_id: payment.id,
                    });
                    counter!("refunds.failed", 1);
                    return Err(err);
                }
            }
            return self.find_payment(payment.id).await;
        }

        // Not gateway-backed (COD or never captured). Admins and relaxed
        // mode approve immediately, otherwise the request awaits review.
        if actor.is_admin() || self.relaxed_refunds {
            self.apply_refund_outcome(
                &payment,
                amount,
                Some(request.reason),
                None,
                None,
                Some(actor.id),
            )
            .await?;
            self.events.send(Event::RefundProcessed {
                payment_id: payment.id,
                refund_id: None,
            });
            counter!("refunds.processed", 1);
        } else {
            let txn = self.db.begin().await?;
            let order = Self::find_order(&txn, payment.order_id).await?;
            guarded_payment_update(
                &txn,
                &payment,
                payment::ActiveModel {
                    refund_status: Set(RefundStatus::Pending),
                    refund_amount: Set(Some(amount)),
                    refund_reason: Set(Some(request.reason)),
                    ..Default::default()
                },
            )
            .await?;
            if order.status != OrderStatus::RefundRequested {
                let fields = status_change_fields(
                    &order,
                    OrderStatus::RefundRequested,
                    Some(actor.id),
                    Some("Refund requested".to_string()),
                );
                guarded_order_update(&txn, &order, fields).await?;
            }
            txn.commit().await?;
            self.events.send(Event::RefundRequested {
                payment_id: payment.id,
                order_id: payment.order_id,
            });
            counter!("refunds.requested", 1);
        }
        self.find_payment(payment.id).await
    }

    /// Admin decision on a pending refund request.
    #[instrument(skip(self, actor, input))]
    pub async fn process_refund(
        &self,
        actor: &AuthUser,
        payment_id: Uuid,
        input: ProcessRefund,
    ) -> Result<payment::Model, ServiceError> {
        if !actor.is_admin() {
            return Err(ServiceError::Forbidden(
                "Only admins can process refunds".into(),
            ));
        }
        let payment = self.find_payment(payment_id).await?;
        if payment.refund_status != RefundStatus::Pending {
            return Err(ServiceError::conflict_with(
                "Only pending refund requests can be processed",
                refund_details(&payment),
            ));
        }
        let amount = payment.refund_amount.unwrap_or(payment.amount);

        match input.status {
            RefundDecision::Processed => {
                self.apply_refund_outcome(
                    &payment,
                    amount,
                    None,
                    input.refund_id.clone(),
                    input.notes,
                    Some(actor.id),
                )
                .await?;
                self.events.send(Event::RefundProcessed {
                    payment_id: payment.id,
                    refund_id: input.refund_id,
                });
                counter!("refunds.processed", 1);
            }
            RefundDecision::Failed => {
                let txn = self.db.begin().await?;
                let order = Self::find_order(&txn, payment.order_id).await?;
                guarded_payment_update(
                    &txn,
                    &payment,
                    payment::ActiveModel {
                        refund_status: Set(RefundStatus::Failed),
                        notes: Set(input.notes),
                        ..Default::default()
                    },
                )
                .await?;
                let fields = status_change_fields(
                    &order,
                    OrderStatus::RefundFailed,
                    Some(actor.id),
                    Some("Refund request rejected".to_string()),
                );
                guarded_order_update(&txn, &order, fields).await?;
                txn.commit().await?;
                self.events.send(Event::RefundFailed {
                    payment_id: payment.id,
                });
                counter!("refunds.failed", 1);
            }
        }
        self.find_payment(payment.id).await
    }

    /// Commits a successful refund: payment refund sub-state, payment
    /// status, order status and the order's payment status, one transaction.
    #[allow(clippy::too_many_arguments)]
    async fn apply_refund_outcome(
        &self,
        payment: &payment::Model,
        amount: Decimal,
        reason: Option<String>,
        refund_id: Option<String>,
        notes: Option<String>,
        actor: Option<Uuid>,
    ) -> Result<(), ServiceError> {
        let txn = self.db.begin().await?;
        let order = Self::find_order(&txn, payment.order_id).await?;

        let mut fields = payment::ActiveModel {
            refund_status: Set(RefundStatus::Processed),
            refund_amount: Set(Some(amount)),
            refund_id: Set(refund_id),
            ..Default::default()
        };
        if let Some(reason) = reason {
            fields.refund_reason = Set(Some(reason));
        }
        if let Some(notes) = notes {
            fields.notes = Set(Some(notes));
        }
        if payment.status.can_transition_to(PaymentStatus::Refunded) {
            fields.status = Set(PaymentStatus::Refunded);
        }
        guarded_payment_update(&txn, payment, fields).await?;

        let mut order_fields = status_change_fields(
            &order,
            OrderStatus::Refunded,
            actor,
            Some("Refund processed".to_string()),
        );
        order_fields.refund_amount = Set(Some(amount));
        if order
            .payment_status
            .can_transition_to(OrderPaymentStatus::Refunded)
        {
            order_fields.payment_status = Set(OrderPaymentStatus::Refunded);
        }
        guarded_order_update(&txn, &order, order_fields).await?;
        txn.commit().await?;
        Ok(())
    }

    /// Raw-body webhook signature check, done before any parsing.
    pub fn verify_webhook(&self, body: &[u8], signature: Option<&str>) -> Result<(), ServiceError> {
        if self.webhook_secret.is_empty() {
            return Err(ServiceError::SignatureError(
                "Webhook secret is not configured".into(),
            ));
        }
        let signature = signature
            .ok_or_else(|| ServiceError::SignatureError("Missing X-Signature header".into()))?;
        if !gateway::verify_webhook_signature(&self.webhook_secret, body, signature) {
            return Err(ServiceError::SignatureError(
                "Webhook signature mismatch".into(),
            ));
        }
        Ok(())
    }

    /// Apply one gateway event. Errors here are logged by the transport
    /// layer, which acknowledges regardless; at-least-once delivery plus the
    /// guards below make reapplication converge.
    #[instrument(skip(self, envelope), fields(event = %envelope.event))]
    pub async fn process_webhook(&self, envelope: WebhookEnvelope) -> Result<(), ServiceError> {
        counter!("webhooks.received", 1);
        match envelope.event.as_str() {
            "payment.authorized" => self.on_payment_authorized(&envelope.payload).await,
            "payment.captured" => self.on_payment_captured(&envelope.payload).await,
            "payment.failed" => self.on_payment_failed(&envelope.payload).await,
            "refund.created" => self.on_refund_created(&envelope.payload).await,
            "refund.processed" => self.on_refund_processed(&envelope.payload).await,
            "refund.failed" => self.on_refund_failed(&envelope.payload).await,
            other => {
                info!(event = other, "ignoring unhandled webhook event");
                Ok(())
            }
        }
    }

    async fn payment_by_gateway_order(
        &self,
        payload: &serde_json::Value,
    ) -> Result<Option<(payment::Model, String)>, ServiceError> {
        let entity = &payload["payment"]["entity"];
        let Some(gateway_order_id) = entity["order_id"].as_str() else {
            warn!("webhook payment entity missing order_id");
            return Ok(None);
        };
        let payment = payment::Entity::find()
            .filter(payment::Column::GatewayOrderId.eq(gateway_order_id))
            .one(&self.db)
            .await?;
        if payment.is_none() {
            warn!(gateway_order_id, "no payment for webhook gateway order, skipping");
        }
        Ok(payment.map(|p| (p, entity["id"].as_str().unwrap_or_default().to_string())))
    }

    async fn payment_by_gateway_payment(
        &self,
        payload: &serde_json::Value,
    ) -> Result<Option<(payment::Model, serde_json::Value)>, ServiceError> {
        let entity = payload["refund"]["entity"].clone();
        let Some(gateway_payment_id) = entity["payment_id"].as_str() else {
            warn!("webhook refund entity missing payment_id");
            return Ok(None);
        };
        let payment = payment::Entity::find()
            .filter(payment::Column::GatewayPaymentId.eq(gateway_payment_id))
            .one(&self.db)
            .await?;
        if payment.is_none() {
            warn!(gateway_payment_id, "no payment for webhook refund, skipping");
        }
        Ok(payment.map(|p| (p, entity)))
    }

    async fn on_payment_authorized(&self, payload: &serde_json::Value) -> Result<(), ServiceError> {
        let Some((payment, gateway_payment_id)) = self.payment_by_gateway_order(payload).await?
        else {
            return Ok(());
        };
        // authorized maps to the pre-capture processing state
        if !payment.status.can_transition_to(PaymentStatus::Processing) {
            return Ok(());
        }
        guarded_payment_update(
            &self.db,
            &payment,
            payment::ActiveModel {
                status: Set(PaymentStatus::Processing),
                gateway_payment_id: Set(Some(gateway_payment_id)),
                ..Default::default()
            },
        )
        .await?;
        self.events.send(Event::PaymentStatusChanged {
            payment_id: payment.id,
            from: payment.status,
            to: PaymentStatus::Processing,
        });
        Ok(())
    }

    async fn on_payment_captured(&self, payload: &serde_json::Value) -> Result<(), ServiceError> {
        let Some((payment, gateway_payment_id)) = self.payment_by_gateway_order(payload).await?
        else {
            return Ok(());
        };

        let txn = self.db.begin().await?;
        let order = Self::find_order(&txn, payment.order_id).await?;
        if payment.status.can_transition_to(PaymentStatus::Completed) {
            guarded_payment_update(
                &txn,
                &payment,
                payment::ActiveModel {
                    status: Set(PaymentStatus::Completed),
                    gateway_payment_id: Set(Some(gateway_payment_id)),
                    ..Default::default()
                },
            )
            .await?;
        }
        let mut order_changed = false;
        if order.status == OrderStatus::Pending {
            let mut fields = status_change_fields(
                &order,
                OrderStatus::Confirmed,
                None,
                Some("Payment captured".to_string()),
            );
            if order.payment_status.can_transition_to(OrderPaymentStatus::Paid) {
                fields.payment_status = Set(OrderPaymentStatus::Paid);
            }
            guarded_order_update(&txn, &order, fields).await?;
            order_changed = true;
        } else if order.payment_status.can_transition_to(OrderPaymentStatus::Paid) {
            guarded_order_update(
                &txn,
                &order,
                order::ActiveModel {
                    payment_status: Set(OrderPaymentStatus::Paid),
                    ..Default::default()
                },
            )
            .await?;
        }
        txn.commit().await?;

        if payment.status != PaymentStatus::Completed {
            self.events.send(Event::PaymentStatusChanged {
                payment_id: payment.id,
                from: payment.status,
                to: PaymentStatus::Completed,
            });
        }
        if order_changed {
            self.events.send(Event::OrderStatusChanged {
                order_id: order.id,
                from: OrderStatus::Pending,
                to: OrderStatus::Confirmed,
            });
        }
        Ok(())
    }

    async fn on_payment_failed(&self, payload: &serde_json::Value) -> Result<(), ServiceError> {
        let Some((payment, gateway_payment_id)) = self.payment_by_gateway_order(payload).await?
        else {
            return Ok(());
        };
        // The rank guard protects a completed or refunded payment from a
        // late-arriving failure.
        if !payment.status.can_transition_to(PaymentStatus::Failed) {
            info!(payment_id = %payment.id, status = %payment.status, "ignoring late payment.failed");
            return Ok(());
        }
        let entity = &payload["payment"]["entity"];

        let txn = self.db.begin().await?;
        let order = Self::find_order(&txn, payment.order_id).await?;
        guarded_payment_update(
            &txn,
            &payment,
            payment::ActiveModel {
                status: Set(PaymentStatus::Failed),
                gateway_payment_id: Set(Some(gateway_payment_id)),
                error_message: Set(entity["error_description"].as_str().map(str::to_owned)),
                error_code: Set(entity["error_code"].as_str().map(str::to_owned)),
                ..Default::default()
            },
        )
        .await?;
        if order.payment_status.can_transition_to(OrderPaymentStatus::Failed) {
            guarded_order_update(
                &txn,
                &order,
                order::ActiveModel {
                    payment_status: Set(OrderPaymentStatus::Failed),
                    ..Default::default()
                },
            )
            .await?;
        }
        txn.commit().await?;

        self.events.send(Event::PaymentStatusChanged {
            payment_id: payment.id,
            from: payment.status,
            to: PaymentStatus::Failed,
        });
        Ok(())
    }

    async fn on_refund_created(&self, payload: &serde_json::Value) -> Result<(), ServiceError> {
        let Some((payment, entity)) = self.payment_by_gateway_payment(payload).await? else {
            return Ok(());
        };
        if !payment.refund_status.can_transition_to(RefundStatus::Pending) {
            return Ok(());
        }
        let amount = entity["amount"]
            .as_i64()
            .map(|minor| Decimal::from(minor) / Decimal::from(100));
        guarded_payment_update(
            &self.db,
            &payment,
            payment::ActiveModel {
                refund_status: Set(RefundStatus::Pending),
                refund_id: Set(entity["id"].as_str().map(str::to_owned)),
                refund_amount: Set(amount.or(payment.refund_amount)),
                ..Default::default()
            },
        )
        .await?;
        Ok(())
    }

    async fn on_refund_processed(&self, payload: &serde_json::Value) -> Result<(), ServiceError> {
        let Some((payment, entity)) = self.payment_by_gateway_payment(payload).await? else {
            return Ok(());
        };
        if payment.refund_status == RefundStatus::Processed {
            return Ok(());
        }
        if !payment.refund_status.can_transition_to(RefundStatus::Processed) {
            return Ok(());
        }
        let amount = payment.refund_amount.unwrap_or(payment.amount);
        let refund_id = entity["id"].as_str().map(str::to_owned).or(payment.refund_id.clone());

        let txn = self.db.begin().await?;
        let order = Self::find_order(&txn, payment.order_id).await?;
        let mut fields = payment::ActiveModel {
            refund_status: Set(RefundStatus::Processed),
            refund_id: Set(refund_id.clone()),
            refund_amount: Set(Some(amount)),
            ..Default::default()
        };
        if payment.status.can_transition_to(PaymentStatus::Refunded) {
            fields.status = Set(PaymentStatus::Refunded);
        }
        guarded_payment_update(&txn, &payment, fields).await?;

        if order.status != OrderStatus::Refunded {
            let mut order_fields = status_change_fields(
                &order,
                OrderStatus::Refunded,
                None,
                Some("Refund processed by gateway".to_string()),
            );
            order_fields.refund_amount = Set(Some(amount));
            if order
                .payment_status
                .can_transition_to(OrderPaymentStatus::Refunded)
            {
                order_fields.payment_status = Set(OrderPaymentStatus::Refunded);
            }
            guarded_order_update(&txn, &order, order_fields).await?;
        }
        txn.commit().await?;

        self.events.send(Event::RefundProcessed {
            payment_id: payment.id,
            refund_id,
        });
        counter!("refunds.processed", 1);
        Ok(())
    }

    async fn on_refund_failed(&self, payload: &serde_json::Value) -> Result<(), ServiceError> {
        let Some((payment, entity)) = self.payment_by_gateway_payment(payload).await? else {
            return Ok(());
        };
        if !payment.refund_status.can_transition_to(RefundStatus::Failed) {
            return Ok(());
        }

        let txn = self.db.begin().await?;
        let order = Self::find_order(&txn, payment.order_id).await?;
        guarded_payment_update(
            &txn,
            &payment,
            payment::ActiveModel {
                refund_status: Set(RefundStatus::Failed),
                error_message: Set(entity["error_description"]
                    .as_str()
                    .map(str::to_owned)
                    .or(Some("Refund failed at gateway".to_string()))),
                ..Default::default()
            },
        )
        .await?;
        if order.status != OrderStatus::RefundFailed {
            let fields = status_change_fields(
                &order,
                OrderStatus::RefundFailed,
                None,
                Some("Refund failed at gateway".to_string()),
            );
            guarded_order_update(&txn, &order, fields).await?;
        }
        txn.commit().await?;

        self.events.send(Event::RefundFailed {
            payment_id: payment.id,
        });
        counter!("refunds.failed", 1);
        Ok(())
    }
}
