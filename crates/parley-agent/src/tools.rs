// SPDX-FileCopyrightText: 2026 Parley Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Commerce tools the generator may call, and their registry.
//!
//! Each tool decodes its arguments into a typed struct before touching the
//! [`Commerce`] collaborator, so a schema-violating call is a
//! [`ParleyError::Validation`] and an unregistered name is a
//! [`ParleyError::UnknownTool`]. Tools never send messages or write state
//! themselves: side effects travel back as a [`SystemAction`] for the
//! processor to apply.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use parley_core::{
    ConversationState, KnowledgeStore, Order, OrderKind, OrderStore, ParleyError,
    SellerNotification, ToolCall, ToolDefinition,
};
use parley_knowledge::scoring::keyword_terms;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// Who a tool call is made for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolContext {
    pub workspace_id: String,
    pub customer_id: String,
    pub interaction_id: String,
}

/// A side effect requested by a tool, applied by the processor.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SystemAction {
    /// Attach a platform-agnostic media payload to the outbound reply.
    AttachMedia { payload: Value },
    /// Enter a state-machine flow on the next turn.
    SeedState { state: ConversationState },
    /// Put an entry in the seller's inbox.
    NotifySeller { title: String, body: String },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ToolResult {
    pub success: bool,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub system_action: Option<SystemAction>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub payload: Option<Value>,
}

impl ToolResult {
    pub fn ok(message: impl Into<String>) -> Self {
        Self {
            success: true,
            message: message.into(),
            system_action: None,
            payload: None,
        }
    }

    pub fn failure(message: impl Into<String>) -> Self {
        Self {
            success: false,
            ..Self::ok(message)
        }
    }

    pub fn with_action(mut self, action: SystemAction) -> Self {
        self.system_action = Some(action);
        self
    }

    pub fn with_payload(mut self, payload: Value) -> Self {
        self.payload = Some(payload);
        self
    }

    /// Text fed back to the model as the tool message.
    pub fn for_model(&self) -> String {
        json!({ "success": self.success, "message": self.message }).to_string()
    }
}

// --- Arguments ---

fn one() -> u32 {
    1
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AddToCartArgs {
    pub item_name: String,
    #[serde(default = "one")]
    pub quantity: u32,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CheckoutArgs {
    #[serde(default)]
    pub note: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ShowCarouselArgs {
    pub query: String,
    #[serde(default)]
    pub limit: Option<usize>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RequestDiscountArgs {
    pub item_name: String,
    pub offered_price: f64,
    #[serde(default)]
    pub currency: Option<String>,
    #[serde(default)]
    pub reason: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CheckOrderStatusArgs {
    pub reference: String,
}

fn parse_args<T: DeserializeOwned>(tool: &str, arguments: Value) -> Result<T, ParleyError> {
    let arguments = if arguments.is_null() {
        Value::Object(Default::default())
    } else {
        arguments
    };
    serde_json::from_value(arguments)
        .map_err(|e| ParleyError::Validation(format!("invalid arguments for {tool}: {e}")))
}

fn require_text(tool: &str, field: &str, value: &str) -> Result<(), ParleyError> {
    if value.trim().is_empty() {
        return Err(ParleyError::Validation(format!(
            "{tool}: {field} must not be empty"
        )));
    }
    Ok(())
}

// --- Collaborator ---

/// The shop behind the tools.
#[async_trait]
pub trait Commerce: Send + Sync {
    async fn add_to_cart(
        &self,
        ctx: &ToolContext,
        args: AddToCartArgs,
    ) -> Result<ToolResult, ParleyError>;

    async fn checkout(
        &self,
        ctx: &ToolContext,
        args: CheckoutArgs,
    ) -> Result<ToolResult, ParleyError>;

    async fn show_carousel(
        &self,
        ctx: &ToolContext,
        args: ShowCarouselArgs,
    ) -> Result<ToolResult, ParleyError>;

    async fn request_discount(
        &self,
        ctx: &ToolContext,
        args: RequestDiscountArgs,
    ) -> Result<ToolResult, ParleyError>;

    async fn check_order_status(
        &self,
        ctx: &ToolContext,
        args: CheckOrderStatusArgs,
    ) -> Result<ToolResult, ParleyError>;
}

// --- Tools ---

#[async_trait]
pub trait Tool: Send + Sync {
    fn name(&self) -> &'static str;

    fn description(&self) -> &'static str;

    /// JSON Schema of the arguments object.
    fn parameters_schema(&self) -> Value;

    async fn invoke(&self, ctx: &ToolContext, arguments: Value) -> Result<ToolResult, ParleyError>;
}

pub struct AddToCart(Arc<dyn Commerce>);
pub struct Checkout(Arc<dyn Commerce>);
pub struct ShowCarousel(Arc<dyn Commerce>);
pub struct RequestDiscount(Arc<dyn Commerce>);
pub struct CheckOrderStatus(Arc<dyn Commerce>);

#[async_trait]
impl Tool for AddToCart {
    fn name(&self) -> &'static str {
        "add_to_cart"
    }

    fn description(&self) -> &'static str {
        "Add a catalogue item to the customer's cart."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "item_name": {"type": "string", "description": "Exact item name from the knowledge"},
                "quantity": {"type": "integer", "minimum": 1, "maximum": 100}
            },
            "required": ["item_name"]
        })
    }

    async fn invoke(&self, ctx: &ToolContext, arguments: Value) -> Result<ToolResult, ParleyError> {
        let args: AddToCartArgs = parse_args(self.name(), arguments)?;
        require_text(self.name(), "item_name", &args.item_name)?;
        if !(1..=100).contains(&args.quantity) {
            return Err(ParleyError::Validation(format!(
                "add_to_cart: quantity {} out of range",
                args.quantity
            )));
        }
        self.0.add_to_cart(ctx, args).await
    }
}

#[async_trait]
impl Tool for Checkout {
    fn name(&self) -> &'static str {
        "checkout"
    }

    fn description(&self) -> &'static str {
        "Place an order for everything in the customer's cart."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "note": {"type": "string", "description": "Delivery or gift note"}
            }
        })
    }

    async fn invoke(&self, ctx: &ToolContext, arguments: Value) -> Result<ToolResult, ParleyError> {
        let args: CheckoutArgs = parse_args(self.name(), arguments)?;
        self.0.checkout(ctx, args).await
    }
}

#[async_trait]
impl Tool for ShowCarousel {
    fn name(&self) -> &'static str {
        "show_carousel"
    }

    fn description(&self) -> &'static str {
        "Show the customer a carousel of matching products."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "query": {"type": "string"},
                "limit": {"type": "integer", "minimum": 1, "maximum": 10}
            },
            "required": ["query"]
        })
    }

    async fn invoke(&self, ctx: &ToolContext, arguments: Value) -> Result<ToolResult, ParleyError> {
        let args: ShowCarouselArgs = parse_args(self.name(), arguments)?;
        require_text(self.name(), "query", &args.query)?;
        self.0.show_carousel(ctx, args).await
    }
}

#[async_trait]
impl Tool for RequestDiscount {
    fn name(&self) -> &'static str {
        "request_discount"
    }

    fn description(&self) -> &'static str {
        "Forward a customer's price offer for an item to the business owner."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "item_name": {"type": "string"},
                "offered_price": {"type": "number", "exclusiveMinimum": 0},
                "currency": {"type": "string"},
                "reason": {"type": "string"}
            },
            "required": ["item_name", "offered_price"]
        })
    }

    async fn invoke(&self, ctx: &ToolContext, arguments: Value) -> Result<ToolResult, ParleyError> {
        let args: RequestDiscountArgs = parse_args(self.name(), arguments)?;
        require_text(self.name(), "item_name", &args.item_name)?;
        if !args.offered_price.is_finite() || args.offered_price <= 0.0 {
            return Err(ParleyError::Validation(
                "request_discount: offered_price must be positive".into(),
            ));
        }
        self.0.request_discount(ctx, args).await
    }
}

#[async_trait]
impl Tool for CheckOrderStatus {
    fn name(&self) -> &'static str {
        "check_order_status"
    }

    fn description(&self) -> &'static str {
        "Look up the status of one of the customer's orders by reference."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "reference": {"type": "string", "description": "For example ORD-1A2B3C4D"}
            },
            "required": ["reference"]
        })
    }

    async fn invoke(&self, ctx: &ToolContext, arguments: Value) -> Result<ToolResult, ParleyError> {
        let args: CheckOrderStatusArgs = parse_args(self.name(), arguments)?;
        require_text(self.name(), "reference", &args.reference)?;
        self.0.check_order_status(ctx, args).await
    }
}

/// Tools indexed by name.
pub struct ToolRegistry {
    tools: HashMap<&'static str, Arc<dyn Tool>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self {
            tools: HashMap::new(),
        }
    }

    /// Registers the five commerce tools backed by `commerce`.
    pub fn commerce(commerce: Arc<dyn Commerce>) -> Self {
        let mut registry = Self::new();
        registry.register(Arc::new(AddToCart(commerce.clone())));
        registry.register(Arc::new(Checkout(commerce.clone())));
        registry.register(Arc::new(ShowCarousel(commerce.clone())));
        registry.register(Arc::new(RequestDiscount(commerce.clone())));
        registry.register(Arc::new(CheckOrderStatus(commerce)));
        registry
    }

    pub fn register(&mut self, tool: Arc<dyn Tool>) {
        self.tools.insert(tool.name(), tool);
    }

    pub fn names(&self) -> Vec<&'static str> {
        let mut names: Vec<_> = self.tools.keys().copied().collect();
        names.sort_unstable();
        names
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    /// Definitions for the provider request, sorted by name.
    pub fn definitions(&self) -> Vec<ToolDefinition> {
        self.names()
            .into_iter()
            .filter_map(|name| self.tools.get(name))
            .map(|tool| ToolDefinition {
                name: tool.name().to_string(),
                description: tool.description().to_string(),
                parameters: tool.parameters_schema(),
            })
            .collect()
    }

    /// Runs one call. Fails only on an unknown name or bad arguments.
    pub async fn invoke(
        &self,
        call: &ToolCall,
        ctx: &ToolContext,
    ) -> Result<ToolResult, ParleyError> {
        let tool = self
            .tools
            .get(call.name.as_str())
            .ok_or_else(|| ParleyError::UnknownTool(call.name.clone()))?;
        debug!(tool = %call.name, interaction_id = %ctx.interaction_id, "invoking tool");
        tool.invoke(ctx, call.arguments.clone()).await
    }

    /// Like [`invoke`](Self::invoke) but never fails: errors become an
    /// unsuccessful result the model can phrase around.
    pub async fn execute(&self, call: &ToolCall, ctx: &ToolContext) -> ToolResult {
        match self.invoke(call, ctx).await {
            Ok(result) => result,
            Err(e) => {
                warn!(
                    tool = %call.name,
                    interaction_id = %ctx.interaction_id,
                    arguments = %call.arguments,
                    error = %e,
                    "tool call rejected"
                );
                ToolResult::failure(match e {
                    ParleyError::UnknownTool(_) => "That action is not available.".to_string(),
                    ParleyError::Validation(_) => {
                        "That request was missing details. Ask the customer to clarify.".to_string()
                    }
                    _ => "That action failed. Apologise and offer help from the team.".to_string(),
                })
            }
        }
    }
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self::new()
    }
}

// --- Catalogue-backed commerce ---

#[derive(Debug, Clone, PartialEq)]
struct CartLine {
    item_id: String,
    name: String,
    quantity: u32,
    unit_price: Option<f64>,
}

/// Extracts a number from a price string such as `$25` or `1,200.50 EUR`.
pub fn parse_price(raw: &str) -> Option<f64> {
    let cleaned: String = raw
        .chars()
        .filter(|c| c.is_ascii_digit() || *c == '.')
        .collect();
    cleaned.parse::<f64>().ok().filter(|p| p.is_finite())
}

#[derive(Debug, Default)]
struct Cart {
    lines: Vec<CartLine>,
    touched: Option<Instant>,
}

impl Cart {
    fn is_live(&self, ttl: Duration, now: Instant) -> bool {
        self.touched.is_some_and(|at| now.duration_since(at) < ttl)
    }
}

/// Carts untouched for this long are dropped.
pub const DEFAULT_CART_TTL: Duration = Duration::from_secs(24 * 60 * 60);

/// [`Commerce`] over the workspace's knowledge items, with an in-process
/// cart per customer. Carts expire after a period without changes.
pub struct CatalogCommerce {
    knowledge: Arc<dyn KnowledgeStore>,
    orders: Arc<dyn OrderStore>,
    carts: DashMap<String, Cart>,
    cart_ttl: Duration,
}

impl CatalogCommerce {
    pub fn new(knowledge: Arc<dyn KnowledgeStore>, orders: Arc<dyn OrderStore>) -> Self {
        Self {
            knowledge,
            orders,
            carts: DashMap::new(),
            cart_ttl: DEFAULT_CART_TTL,
        }
    }

    pub fn with_cart_ttl(mut self, ttl: Duration) -> Self {
        self.cart_ttl = ttl;
        self
    }

    /// Number of lines in a customer's live cart.
    pub fn cart_len(&self, customer_id: &str) -> usize {
        self.live_lines(customer_id).len()
    }

    /// Drops expired carts. Returns how many were removed.
    pub fn sweep_carts(&self) -> usize {
        let now = Instant::now();
        let before = self.carts.len();
        self.carts.retain(|_, cart| cart.is_live(self.cart_ttl, now));
        before.saturating_sub(self.carts.len())
    }

    fn live_lines(&self, customer_id: &str) -> Vec<CartLine> {
        let now = Instant::now();
        self.carts
            .get(customer_id)
            .filter(|c| c.is_live(self.cart_ttl, now))
            .map(|c| c.lines.clone())
            .unwrap_or_default()
    }
}

#[async_trait]
impl Commerce for CatalogCommerce {
    async fn add_to_cart(
        &self,
        ctx: &ToolContext,
        args: AddToCartArgs,
    ) -> Result<ToolResult, ParleyError> {
        let Some(item) = self
            .knowledge
            .find_active_by_name(&ctx.workspace_id, args.item_name.trim())
            .await?
        else {
            return Ok(ToolResult::failure(format!(
                "{} is not in the catalogue.",
                args.item_name.trim()
            )));
        };
        let line = CartLine {
            item_id: item.id.clone(),
            name: item.name.clone(),
            quantity: args.quantity,
            unit_price: item.meta.get("price").and_then(|p| parse_price(p)),
        };
        let count = {
            let now = Instant::now();
            let mut cart = self.carts.entry(ctx.customer_id.clone()).or_default();
            if !cart.is_live(self.cart_ttl, now) {
                cart.lines.clear();
            }
            cart.touched = Some(now);
            match cart.lines.iter_mut().find(|l| l.item_id == line.item_id) {
                Some(existing) => existing.quantity += line.quantity,
                None => cart.lines.push(line),
            }
            cart.lines.len()
        };
        Ok(ToolResult::ok(format!(
            "Added {} x {} to the cart. The cart has {count} item(s).",
            args.quantity, item.name
        ))
        .with_payload(json!({ "item_id": item.id, "quantity": args.quantity })))
    }

    async fn checkout(
        &self,
        ctx: &ToolContext,
        args: CheckoutArgs,
    ) -> Result<ToolResult, ParleyError> {
        let lines = self.live_lines(&ctx.customer_id);
        if lines.is_empty() {
            return Ok(ToolResult::failure("The cart is empty."));
        }

        let summary = lines
            .iter()
            .map(|l| format!("{} x {}", l.quantity, l.name))
            .collect::<Vec<_>>()
            .join(", ");
        let mut order = Order::new(&ctx.workspace_id, &ctx.customer_id, OrderKind::Product, &summary);
        for (i, line) in lines.iter().enumerate() {
            order
                .fields
                .insert(format!("line_{}", i + 1), format!("{} x {}", line.quantity, line.name));
        }
        if let Some(note) = args.note.filter(|n| !n.trim().is_empty()) {
            order.fields.insert("note".into(), note);
        }
        order.amount = lines
            .iter()
            .map(|l| l.unit_price.map(|p| p * f64::from(l.quantity)))
            .sum::<Option<f64>>();

        let mut notification = SellerNotification::new(
            &ctx.workspace_id,
            "new_order",
            format!("New order {}", order.reference),
            summary.clone(),
        );
        notification.related_id = Some(order.id.clone());
        self.orders
            .create_order_with_notification(&order, &notification)
            .await?;
        self.carts.remove(&ctx.customer_id);
        info!(
            workspace_id = %ctx.workspace_id,
            reference = %order.reference,
            "cart checked out"
        );

        Ok(ToolResult::ok(format!(
            "Order {} placed: {summary}. The team will confirm it shortly.",
            order.reference
        ))
        .with_payload(json!({ "reference": order.reference, "amount": order.amount })))
    }

    async fn show_carousel(
        &self,
        ctx: &ToolContext,
        args: ShowCarouselArgs,
    ) -> Result<ToolResult, ParleyError> {
        let limit = args.limit.unwrap_or(5).clamp(1, 10);
        let terms = keyword_terms(&args.query, 8);
        if terms.is_empty() {
            return Ok(ToolResult::failure("No products match that search."));
        }
        let now = chrono::Utc::now();
        let items: Vec<_> = self
            .knowledge
            .keyword_search(&ctx.workspace_id, &terms, limit * 2)
            .await?
            .into_iter()
            .filter(|i| i.is_active(now))
            .take(limit)
            .collect();
        if items.is_empty() {
            return Ok(ToolResult::failure("No products match that search."));
        }

        let cards: Vec<Value> = items
            .iter()
            .map(|i| {
                json!({
                    "id": i.id,
                    "title": i.name,
                    "subtitle": i.content,
                    "price": i.meta.get("price"),
                    "image_url": i.meta.get("image_url"),
                })
            })
            .collect();
        let payload = json!({ "type": "carousel", "items": cards });
        let names = items.iter().map(|i| i.name.as_str()).collect::<Vec<_>>().join(", ");
        Ok(ToolResult::ok(format!("Showing {} product(s): {names}.", items.len()))
            .with_action(SystemAction::AttachMedia {
                payload: payload.clone(),
            })
            .with_payload(payload))
    }

    async fn request_discount(
        &self,
        _ctx: &ToolContext,
        args: RequestDiscountArgs,
    ) -> Result<ToolResult, ParleyError> {
        let currency = args.currency.unwrap_or_default();
        let offer = format!("{} {}", args.offered_price, currency);
        let mut body = format!("Customer offers {} for {}.", offer.trim(), args.item_name);
        if let Some(reason) = args.reason.filter(|r| !r.trim().is_empty()) {
            body.push_str(&format!(" Reason: {reason}"));
        }
        Ok(ToolResult::ok(format!(
            "The offer for {} was sent to the team. Tell the customer they will hear back soon.",
            args.item_name
        ))
        .with_action(SystemAction::NotifySeller {
            title: format!("Discount request: {}", args.item_name),
            body,
        }))
    }

    async fn check_order_status(
        &self,
        ctx: &ToolContext,
        args: CheckOrderStatusArgs,
    ) -> Result<ToolResult, ParleyError> {
        let reference = args.reference.trim().to_uppercase();
        let order = self
            .orders
            .find_order(&ctx.workspace_id, &reference)
            .await?
            .filter(|o| o.customer_id == ctx.customer_id);
        Ok(match order {
            Some(o) => ToolResult::ok(format!(
                "Order {}: {}. Status: {}.",
                o.reference, o.summary, o.status
            ))
            .with_payload(json!({ "reference": o.reference, "status": o.status })),
            None => ToolResult::failure(format!("No order found with reference {reference}."))
                .with_action(SystemAction::SeedState {
                    state: ConversationState::AwaitingOrderId,
                }),
        })
    }
}
