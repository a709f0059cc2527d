//! The four-step gifting flow as a pure state machine.
//!
//! Nothing here performs I/O. Transitions that need network work return a
//! request describing it; the controller runs the request and feeds the
//! result back in. Results carry the run id they were issued for, so a
//! result arriving after the operator moved on is dropped.

use crate::bitrefill_client::{
    CreateInvoiceProduct,
    CreateInvoiceRequest,
    CreateInvoiceResponse,
    OrderData,
    PaymentMethod,
    ProductResponse,
};
use farcaster::{
    CancelFlag,
    ChannelGroup,
    UserProfile,
    draw::draw_index,
    extract_fid,
};
use rand::Rng;
use serde_json::Value;

pub const PRODUCT_LOAD_ERROR: &str = "Failed to load reward product.";

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum Step {
    #[default]
    Rules,
    Winner,
    Purchase,
    Distribute,
}

impl Step {
    pub fn number(self) -> u8 {
        match self {
            Step::Rules => 1,
            Step::Winner => 2,
            Step::Purchase => 3,
            Step::Distribute => 4,
        }
    }

    pub fn title(self) -> &'static str {
        match self {
            Step::Rules => "Enter channel details",
            Step::Winner => "View winner",
            Step::Purchase => "Reward selection",
            Step::Distribute => "Distribute reward",
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum DrawMode {
    #[default]
    Random,
}

impl DrawMode {
    pub fn as_str(self) -> &'static str {
        match self {
            DrawMode::Random => "random",
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Rules {
    pub channel_id: String,
    pub group: ChannelGroup,
    pub mode: DrawMode,
}

#[derive(Clone, Debug, Default, PartialEq)]
pub enum WinnerPhase {
    #[default]
    Idle,
    Fetching,
    Resolving,
    Ready,
    Failed(String),
}

#[derive(Clone, Debug, Default)]
pub struct WinnerState {
    pub run: u64,
    pub cancel: CancelFlag,
    pub fetched: usize,
    pub members: Vec<Value>,
    pub winner: Option<Value>,
    pub draw: u64,
    pub profile: Option<UserProfile>,
    pub note: Option<String>,
    pub phase: WinnerPhase,
}

#[derive(Clone, Debug, Default)]
pub struct PurchaseState {
    pub product: Option<ProductResponse>,
    pub loading: bool,
    pub purchasing: bool,
    pub error: Option<String>,
}

#[derive(Clone, Debug)]
pub struct FetchRequest {
    pub run: u64,
    pub channel_id: String,
    pub group: ChannelGroup,
    pub cancel: CancelFlag,
}

#[derive(Clone, Debug, PartialEq)]
pub struct LookupRequest {
    pub run: u64,
    pub draw: u64,
    pub record: Value,
}

#[derive(Debug, Default)]
pub struct Wizard {
    step: Step,
    rules: Rules,
    winner: WinnerState,
    purchase: PurchaseState,
    invoice: Option<CreateInvoiceResponse>,
    next_run: u64,
}

impl Wizard {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn step(&self) -> Step {
        self.step
    }

    pub fn rules(&self) -> &Rules {
        &self.rules
    }

    pub fn winner(&self) -> &WinnerState {
        &self.winner
    }

    pub fn purchase(&self) -> &PurchaseState {
        &self.purchase
    }

    pub fn invoice(&self) -> Option<&CreateInvoiceResponse> {
        self.invoice.as_ref()
    }

    pub fn push_channel_char(&mut self, c: char) {
        if self.step == Step::Rules {
            self.rules.channel_id.push(c);
        }
    }

    pub fn pop_channel_char(&mut self) {
        if self.step == Step::Rules {
            self.rules.channel_id.pop();
        }
    }

    pub fn toggle_group(&mut self) {
        if self.step == Step::Rules {
            self.rules.group = self.rules.group.toggle();
        }
    }

    /// Leaves the rules step. Returns `None` while the channel id is blank.
    pub fn submit_rules(&mut self) -> Option<FetchRequest> {
        if self.step != Step::Rules {
            return None;
        }
        let channel_id = self.rules.channel_id.trim().to_string();
        if channel_id.is_empty() {
            return None;
        }
        self.next_run += 1;
        self.winner = WinnerState {
            run: self.next_run,
            phase: WinnerPhase::Fetching,
            ..WinnerState::default()
        };
        self.step = Step::Winner;
        Some(FetchRequest {
            run: self.next_run,
            channel_id,
            group: self.rules.group,
            cancel: self.winner.cancel.clone(),
        })
    }

    fn accepts(&self, run: u64) -> bool {
        self.step == Step::Winner
            && self.winner.run == run
            && !self.winner.cancel.is_cancelled()
    }

    /// Returns whether the update was applied.
    pub fn record_progress(&mut self, run: u64, fetched: usize) -> bool {
        if !self.accepts(run) || self.winner.phase != WinnerPhase::Fetching {
            return false;
        }
        self.winner.fetched = fetched;
        true
    }

    /// Stores the fetched set and draws once. A lookup is requested when the
    /// drawn record carries a FID.
    pub fn complete_fetch<R: Rng + ?Sized>(
        &mut self,
        run: u64,
        members: Vec<Value>,
        rng: &mut R,
    ) -> Option<LookupRequest> {
        if !self.accepts(run) || self.winner.phase != WinnerPhase::Fetching {
            return None;
        }
        self.winner.fetched = members.len();
        self.winner.members = members;
        self.draw(rng)
    }

    pub fn fail_fetch(&mut self, run: u64, message: impl Into<String>) {
        if self.accepts(run) {
            self.winner.phase = WinnerPhase::Failed(message.into());
        }
    }

    /// Re-draws from the same fetched set. Only allowed once the previous
    /// draw has settled.
    pub fn redraw<R: Rng + ?Sized>(&mut self, rng: &mut R) -> Option<LookupRequest> {
        if self.step != Step::Winner || self.winner.phase != WinnerPhase::Ready {
            return None;
        }
        self.draw(rng)
    }

    fn draw<R: Rng + ?Sized>(&mut self, rng: &mut R) -> Option<LookupRequest> {
        self.winner.draw += 1;
        self.winner.profile = None;
        self.winner.note = None;
        let Some(index) = draw_index(self.winner.members.len(), rng) else {
            self.winner.winner = None;
            self.winner.phase = WinnerPhase::Ready;
            self.winner.note = Some("No one to draw from".to_string());
            return None;
        };
        let record = self.winner.members[index].clone();
        self.winner.winner = Some(record.clone());
        if extract_fid(&record).is_none() {
            self.winner.phase = WinnerPhase::Ready;
            self.winner.note = Some("Winner has no FID; details unavailable".to_string());
            return None;
        }
        self.winner.phase = WinnerPhase::Resolving;
        Some(LookupRequest {
            run: self.winner.run,
            draw: self.winner.draw,
            record,
        })
    }

    pub fn complete_lookup(
        &mut self,
        run: u64,
        draw: u64,
        result: Result<Option<UserProfile>, String>,
    ) {
        if !self.accepts(run)
            || self.winner.draw != draw
            || self.winner.phase != WinnerPhase::Resolving
        {
            return;
        }
        match result {
            Ok(Some(profile)) => self.winner.profile = Some(profile),
            Ok(None) => {
                self.winner.note = Some("No winner details available".to_string());
            }
            Err(e) => {
                self.winner.note = Some(format!("Winner lookup failed: {e}"));
            }
        }
        self.winner.phase = WinnerPhase::Ready;
    }

    pub fn can_continue(&self) -> bool {
        self.step == Step::Winner
            && self.winner.phase == WinnerPhase::Ready
            && self.winner.winner.is_some()
    }

    /// Tears down the winner step and enters the purchase step. The caller
    /// loads the product when this returns `true`.
    pub fn continue_to_purchase(&mut self) -> bool {
        if !self.can_continue() {
            return false;
        }
        self.winner.cancel.cancel();
        self.purchase = PurchaseState {
            loading: true,
            ..PurchaseState::default()
        };
        self.step = Step::Purchase;
        true
    }

    /// Retry after a failed product load.
    pub fn begin_product_load(&mut self) -> bool {
        if self.step != Step::Purchase || self.purchase.loading || self.purchase.purchasing {
            return false;
        }
        self.purchase.loading = true;
        self.purchase.error = None;
        true
    }

    pub fn product_loaded(&mut self, result: Result<ProductResponse, String>) {
        if self.step != Step::Purchase || !self.purchase.loading {
            return;
        }
        self.purchase.loading = false;
        match result {
            Ok(product) => {
                self.purchase.product = Some(product);
                self.purchase.error = None;
            }
            Err(e) => {
                tracing::warn!(error = %e, "reward product load failed");
                self.purchase.product = None;
                self.purchase.error = Some(PRODUCT_LOAD_ERROR.to_string());
            }
        }
    }

    /// Invoice for the first package of the loaded product, paid from balance.
    pub fn purchase_request(&mut self) -> Option<CreateInvoiceRequest> {
        if self.step != Step::Purchase || self.purchase.loading || self.purchase.purchasing {
            return None;
        }
        let product = self.purchase.product.as_ref()?;
        let package = product.data.packages.first()?;
        let request = CreateInvoiceRequest {
            products: vec![CreateInvoiceProduct {
                product_id: product.data.id.clone(),
                package_id: package.id.clone(),
                value: None,
                quantity: 1,
            }],
            auto_pay: true,
            payment_method: PaymentMethod::Balance,
        };
        self.purchase.purchasing = true;
        self.purchase.error = None;
        Some(request)
    }

    pub fn purchase_failed(&mut self, message: impl Into<String>) {
        if self.step == Step::Purchase && self.purchase.purchasing {
            self.purchase.purchasing = false;
            self.purchase.error = Some(message.into());
        }
    }

    pub fn purchase_completed(&mut self, invoice: CreateInvoiceResponse) {
        if self.step != Step::Purchase || !self.purchase.purchasing {
            return;
        }
        self.purchase.purchasing = false;
        self.invoice = Some(invoice);
        self.step = Step::Distribute;
    }

    /// Order ids of the current invoice, for status refresh.
    pub fn order_ids(&self) -> Vec<String> {
        self.invoice
            .iter()
            .flat_map(|invoice| invoice.data.orders.iter())
            .map(|order| order.id.clone())
            .filter(|id| !id.is_empty())
            .collect()
    }

    pub fn order_refreshed(&mut self, order: OrderData) {
        let Some(invoice) = self.invoice.as_mut() else {
            return;
        };
        if let Some(existing) = invoice.data.orders.iter_mut().find(|o| o.id == order.id) {
            *existing = order;
        }
    }

    /// Start over from step 1. Not available on step 1 itself.
    pub fn reset(&mut self) -> bool {
        if self.step == Step::Rules {
            return false;
        }
        self.winner.cancel.cancel();
        let next_run = self.next_run;
        *self = Self {
            next_run,
            ..Self::default()
        };
        true
    }
}
