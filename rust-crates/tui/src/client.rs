use crate::{
    bitrefill_client::{
        BalanceData,
        BalanceResponse,
        BitrefillClient,
        CreateInvoiceRequest,
        CreateInvoiceResponse,
        OrderResponse,
        ProductResponse,
    },
    ui,
    wizard::{
        FetchRequest,
        LookupRequest,
        PurchaseState,
        Rules,
        Step,
        WinnerPhase,
        Wizard,
    },
};
use color_eyre::eyre::{
    Result,
    WrapErr,
    eyre,
};
use farcaster::{
    AppUsersClient,
    ChannelFetcher,
    FarcasterClient,
    FetchOutcome,
    UserProfile,
    extract_fid,
    resolve_winner,
};
use gifter_common::{
    BitrefillSettings,
    ConfigProvider,
    FileConfigStore,
};
use rand::{
    SeedableRng,
    rngs::StdRng,
};
use serde_json::Value;
use std::path::PathBuf;
use tokio::sync::mpsc;
use tracing::{
    error,
    info,
    warn,
};

pub const DEFAULT_APP_URL: &str = "http://127.0.0.1:3000";
const MAX_ERRORS: usize = 50;

#[derive(Clone, Debug)]
pub struct AppConfig {
    pub app_url: String,
    pub settings_path: Option<String>,
    pub log_dir: PathBuf,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub enum AccountStatus {
    #[default]
    Unknown,
    Checking,
    Reachable,
    Failed(String),
}

#[derive(Clone, Debug)]
pub struct AppSnapshot {
    pub step: Step,
    pub rules: Rules,
    pub fetched: usize,
    pub phase: WinnerPhase,
    pub winner: Option<Value>,
    pub winner_fid: Option<u64>,
    pub profile: Option<UserProfile>,
    pub note: Option<String>,
    pub can_continue: bool,
    pub purchase: PurchaseState,
    pub invoice: Option<CreateInvoiceResponse>,
    pub api_key: Option<String>,
    pub product_id: String,
    pub account: AccountStatus,
    pub balance: Option<BalanceData>,
    pub status: String,
    pub errors: Vec<String>,
}

/// Network work requested by the controller. The run loop spawns each job;
/// results come back as [`WorkerEvent`]s.
#[derive(Clone, Debug)]
pub enum Job {
    FetchChannel(FetchRequest),
    LookupWinner(LookupRequest),
    LoadProduct(String),
    CreateInvoice(CreateInvoiceRequest),
    RefreshOrder(String),
    Ping,
    Balance,
}

#[derive(Debug)]
pub enum WorkerEvent {
    FetchProgress {
        run: u64,
        fetched: usize,
    },
    FetchDone {
        run: u64,
        result: Result<FetchOutcome, String>,
    },
    Lookup {
        run: u64,
        draw: u64,
        result: Result<Option<UserProfile>, String>,
    },
    Product(Result<ProductResponse, String>),
    Invoice(Result<CreateInvoiceResponse, String>),
    Order(Result<OrderResponse, String>),
    Ping(Result<Value, String>),
    Balance(Result<BalanceResponse, String>),
}

/// Clients used by spawned jobs, plus the channel they report on.
#[derive(Clone)]
pub struct Workers {
    bitrefill: BitrefillClient,
    users: AppUsersClient,
    channels: FarcasterClient,
    events: mpsc::UnboundedSender<WorkerEvent>,
}

impl Workers {
    pub fn new(
        app_url: &str,
        api_key: Option<String>,
        events: mpsc::UnboundedSender<WorkerEvent>,
    ) -> Result<Self> {
        let bitrefill = BitrefillClient::new(app_url, api_key)?;
        let users = AppUsersClient::new(app_url).map_err(|e| eyre!("{e:#}"))?;
        let channels = FarcasterClient::public().map_err(|e| eyre!("{e:#}"))?;
        Ok(Self {
            bitrefill,
            users,
            channels,
            events,
        })
    }

    fn set_api_key(&mut self, api_key: Option<String>) {
        self.bitrefill.set_api_key(api_key);
    }

    pub fn spawn(&self, job: Job) {
        let workers = self.clone();
        tokio::spawn(async move { workers.run(job).await });
    }

    async fn run(self, job: Job) {
        let event = match job {
            Job::FetchChannel(request) => {
                let FetchRequest {
                    run,
                    channel_id,
                    group,
                    cancel,
                } = request;
                let fetcher = ChannelFetcher::new(self.channels.clone());
                let progress = self.events.clone();
                let result = fetcher
                    .fetch_all(&channel_id, group, &cancel, |fetched| {
                        let _ = progress.send(WorkerEvent::FetchProgress { run, fetched });
                    })
                    .await
                    .map_err(|e| format!("{e:#}"));
                WorkerEvent::FetchDone { run, result }
            }
            Job::LookupWinner(request) => {
                let result = resolve_winner(&self.users, &request.record)
                    .await
                    .map_err(|e| format!("{e:#}"));
                WorkerEvent::Lookup {
                    run: request.run,
                    draw: request.draw,
                    result,
                }
            }
            Job::LoadProduct(product_id) => WorkerEvent::Product(
                self.bitrefill
                    .get_product(&product_id)
                    .await
                    .map_err(|e| format!("{e:#}")),
            ),
            Job::CreateInvoice(request) => WorkerEvent::Invoice(
                self.bitrefill
                    .create_invoice(&request)
                    .await
                    .map_err(|e| format!("{e:#}")),
            ),
            Job::RefreshOrder(order_id) => WorkerEvent::Order(
                self.bitrefill
                    .get_order(&order_id)
                    .await
                    .map_err(|e| format!("{e:#}")),
            ),
            Job::Ping => {
                WorkerEvent::Ping(self.bitrefill.ping().await.map_err(|e| format!("{e:#}")))
            }
            Job::Balance => WorkerEvent::Balance(
                self.bitrefill
                    .get_balance()
                    .await
                    .map_err(|e| format!("{e:#}")),
            ),
        };
        if self.events.send(event).is_err() {
            warn!("worker event dropped, UI loop has exited");
        }
    }
}

pub struct AppController<C> {
    wizard: Wizard,
    settings: BitrefillSettings<C>,
    workers: Workers,
    rng: StdRng,
    account: AccountStatus,
    balance: Option<BalanceData>,
    status: String,
    errors: Vec<String>,
}

impl AppController<FileConfigStore> {
    pub fn new(
        config: &AppConfig,
        events: mpsc::UnboundedSender<WorkerEvent>,
    ) -> Result<Self> {
        let store = FileConfigStore::open_default(config.settings_path.as_deref())
            .map_err(|e| eyre!("{e:#}"))
            .wrap_err("failed to open settings")?;
        info!(path = %store.path().display(), "settings loaded");
        Self::with_settings(config, BitrefillSettings::new(store), events)
    }
}

impl<C: ConfigProvider> AppController<C> {
    pub fn with_settings(
        config: &AppConfig,
        settings: BitrefillSettings<C>,
        events: mpsc::UnboundedSender<WorkerEvent>,
    ) -> Result<Self> {
        let api_key = settings.api_key().map_err(|e| eyre!("{e:#}"))?;
        let workers = Workers::new(&config.app_url, api_key, events)?;
        Ok(Self {
            wizard: Wizard::new(),
            settings,
            workers,
            rng: StdRng::from_rng(&mut rand::rng()),
            account: AccountStatus::Unknown,
            balance: None,
            status: String::from("Ready"),
            errors: Vec::new(),
        })
    }

    pub fn with_rng(mut self, rng: StdRng) -> Self {
        self.rng = rng;
        self
    }

    pub fn dispatch(&self, jobs: Vec<Job>) {
        for job in jobs {
            self.workers.spawn(job);
        }
    }

    /// Stops any in-flight channel fetch.
    pub fn shutdown(&mut self) {
        self.wizard.winner().cancel.cancel();
    }

    pub fn wizard(&self) -> &Wizard {
        &self.wizard
    }

    fn set_status(&mut self, message: impl Into<String>) {
        self.status = message.into();
        self.errors.clear();
    }

    fn push_errors(&mut self, mut items: Vec<String>) {
        if items.is_empty() {
            return;
        }
        for item in &items {
            error!("{}", item);
        }
        self.errors.append(&mut items);
        if self.errors.len() > MAX_ERRORS {
            let drain = self.errors.len() - MAX_ERRORS;
            self.errors.drain(0..drain);
        }
    }

    fn api_key(&self) -> Option<String> {
        match self.settings.api_key() {
            Ok(key) => key.filter(|k| !k.is_empty()),
            Err(e) => {
                warn!(error = %e, "failed to read API key setting");
                None
            }
        }
    }

    fn product_id(&mut self) -> Result<String, String> {
        self.settings.product().map_err(|e| format!("{e:#}"))
    }

    /// Ping and balance at startup when a key is already configured.
    pub fn startup_jobs(&mut self) -> Vec<Job> {
        if self.api_key().is_some() {
            self.check_account()
        } else {
            self.set_status("Bitrefill API key not set. Press F2 to open settings.");
            Vec::new()
        }
    }

    pub fn snapshot(&mut self) -> AppSnapshot {
        let api_key = self.api_key();
        let product_id = self.product_id().unwrap_or_default();
        let winner = self.wizard.winner();
        AppSnapshot {
            step: self.wizard.step(),
            rules: self.wizard.rules().clone(),
            fetched: winner.fetched,
            phase: winner.phase.clone(),
            winner: winner.winner.clone(),
            winner_fid: winner.winner.as_ref().and_then(extract_fid),
            profile: winner.profile.clone(),
            note: winner.note.clone(),
            can_continue: self.wizard.can_continue(),
            purchase: self.wizard.purchase().clone(),
            invoice: self.wizard.invoice().cloned(),
            api_key,
            product_id,
            account: self.account.clone(),
            balance: self.balance.clone(),
            status: self.status.clone(),
            errors: self.errors.iter().rev().take(5).rev().cloned().collect(),
        }
    }

    pub fn handle_user_event(&mut self, event: ui::UserEvent) -> Vec<Job> {
        match event {
            ui::UserEvent::Quit | ui::UserEvent::Redraw => Vec::new(),
            ui::UserEvent::ChannelInput(c) => {
                self.wizard.push_channel_char(c);
                Vec::new()
            }
            ui::UserEvent::ChannelBackspace => {
                self.wizard.pop_channel_char();
                Vec::new()
            }
            ui::UserEvent::ToggleGroup => {
                self.wizard.toggle_group();
                Vec::new()
            }
            ui::UserEvent::Confirm => self.confirm(),
            ui::UserEvent::DrawAgain => self.draw_again(),
            ui::UserEvent::RetryProduct => self.retry_product(),
            ui::UserEvent::RefreshOrders => self.refresh_orders(),
            ui::UserEvent::StartOver => {
                if self.wizard.reset() {
                    self.set_status("Started over");
                }
                Vec::new()
            }
            ui::UserEvent::CheckAccount => self.check_account(),
            ui::UserEvent::SaveSettings { api_key, product } => {
                self.save_settings(&api_key, &product)
            }
        }
    }

    fn confirm(&mut self) -> Vec<Job> {
        match self.wizard.step() {
            Step::Rules => match self.wizard.submit_rules() {
                Some(request) => {
                    self.set_status(format!(
                        "Fetching {} of /{}...",
                        request.group, request.channel_id
                    ));
                    vec![Job::FetchChannel(request)]
                }
                None => {
                    self.push_errors(vec!["Enter a channel id first".to_string()]);
                    Vec::new()
                }
            },
            Step::Winner => {
                if !self.wizard.continue_to_purchase() {
                    return Vec::new();
                }
                self.load_product()
            }
            Step::Purchase => {
                let purchase = self.wizard.purchase();
                if purchase.product.is_none() && purchase.error.is_some() {
                    return self.retry_product();
                }
                match self.wizard.purchase_request() {
                    Some(request) => {
                        self.set_status("Purchasing gift card...");
                        vec![Job::CreateInvoice(request)]
                    }
                    None => Vec::new(),
                }
            }
            Step::Distribute => self.refresh_orders(),
        }
    }

    fn load_product(&mut self) -> Vec<Job> {
        match self.product_id() {
            Ok(product_id) => {
                self.set_status(format!("Loading product {product_id}..."));
                vec![Job::LoadProduct(product_id)]
            }
            Err(e) => {
                self.wizard.product_loaded(Err(e));
                Vec::new()
            }
        }
    }

    fn draw_again(&mut self) -> Vec<Job> {
        let lookup = self.wizard.redraw(&mut self.rng);
        self.set_status("Drew again");
        lookup.map(Job::LookupWinner).into_iter().collect()
    }

    fn retry_product(&mut self) -> Vec<Job> {
        if self.wizard.step() != Step::Purchase || self.wizard.purchase().product.is_some()
        {
            return Vec::new();
        }
        if !self.wizard.begin_product_load() {
            return Vec::new();
        }
        self.load_product()
    }

    fn refresh_orders(&mut self) -> Vec<Job> {
        let ids = self.wizard.order_ids();
        if ids.is_empty() {
            return Vec::new();
        }
        self.set_status(format!("Refreshing {} order(s)...", ids.len()));
        ids.into_iter().map(Job::RefreshOrder).collect()
    }

    fn check_account(&mut self) -> Vec<Job> {
        if self.api_key().is_none() {
            self.account = AccountStatus::Failed(
                crate::bitrefill_client::MISSING_KEY_MESSAGE.to_string(),
            );
            return Vec::new();
        }
        self.account = AccountStatus::Checking;
        vec![Job::Ping, Job::Balance]
    }

    fn save_settings(&mut self, api_key: &str, product: &str) -> Vec<Job> {
        let api_key = api_key.trim();
        let product = product.trim();
        let mut failures = Vec::new();
        if let Err(e) = self.settings.set_api_key(api_key) {
            failures.push(format!("Saving API key failed: {e:#}"));
        }
        if !product.is_empty() {
            if let Err(e) = self.settings.set_product(product) {
                failures.push(format!("Saving product failed: {e:#}"));
            }
        }
        if !failures.is_empty() {
            self.push_errors(failures);
            return Vec::new();
        }
        self.workers
            .set_api_key(Some(api_key.to_string()).filter(|k| !k.is_empty()));
        self.balance = None;
        self.set_status("Settings saved");
        self.check_account()
    }

    pub fn handle_worker_event(&mut self, event: WorkerEvent) -> Vec<Job> {
        match event {
            WorkerEvent::FetchProgress { run, fetched } => {
                if self.wizard.record_progress(run, fetched) {
                    self.status = format!("Fetched {fetched} records...");
                }
                Vec::new()
            }
            WorkerEvent::FetchDone { run, result } => match result {
                Ok(FetchOutcome::Complete(members)) => {
                    let count = members.len();
                    let lookup = self.wizard.complete_fetch(run, members, &mut self.rng);
                    if self.wizard.winner().run == run {
                        self.set_status(format!("Fetched {count} records"));
                    }
                    lookup.map(Job::LookupWinner).into_iter().collect()
                }
                Ok(FetchOutcome::Cancelled { fetched }) => {
                    info!(run, fetched, "channel fetch cancelled");
                    Vec::new()
                }
                Err(e) => {
                    self.wizard.fail_fetch(run, e.clone());
                    if self.wizard.winner().run == run
                        && matches!(self.wizard.winner().phase, WinnerPhase::Failed(_))
                    {
                        self.push_errors(vec![format!("Fetching channel failed: {e}")]);
                    }
                    Vec::new()
                }
            },
            WorkerEvent::Lookup { run, draw, result } => {
                self.wizard.complete_lookup(run, draw, result);
                Vec::new()
            }
            WorkerEvent::Product(result) => {
                let failed = result.is_err();
                self.wizard.product_loaded(result);
                if !failed && self.wizard.purchase().product.is_some() {
                    self.set_status("Product loaded. Press Enter to purchase.");
                }
                Vec::new()
            }
            WorkerEvent::Invoice(Ok(invoice)) => {
                let id = invoice.data.id.clone();
                self.wizard.purchase_completed(invoice);
                if self.wizard.step() == Step::Distribute {
                    self.set_status(format!("Invoice {id} created"));
                    // balance moved
                    return self.check_account();
                }
                Vec::new()
            }
            WorkerEvent::Invoice(Err(e)) => {
                let message = format!("Purchase failed: {e}");
                self.wizard.purchase_failed(message.clone());
                self.push_errors(vec![message]);
                Vec::new()
            }
            WorkerEvent::Order(Ok(order)) => {
                let id = order.data.id.clone();
                let status = order.data.status.clone();
                self.wizard.order_refreshed(order.data);
                self.set_status(format!("Order {id}: {status}"));
                Vec::new()
            }
            WorkerEvent::Order(Err(e)) => {
                self.push_errors(vec![format!("Order refresh failed: {e}")]);
                Vec::new()
            }
            WorkerEvent::Ping(Ok(_)) => {
                self.account = AccountStatus::Reachable;
                Vec::new()
            }
            WorkerEvent::Ping(Err(e)) => {
                self.account = AccountStatus::Failed(e);
                Vec::new()
            }
            WorkerEvent::Balance(Ok(balance)) => {
                self.balance = Some(balance.data);
                Vec::new()
            }
            WorkerEvent::Balance(Err(e)) => {
                warn!(error = %e, "balance lookup failed");
                self.balance = None;
                Vec::new()
            }
        }
    }
}

pub async fn run_app(config: AppConfig) -> Result<()> {
    let (events_tx, events_rx) = mpsc::unbounded_channel();
    let controller = AppController::new(&config, events_tx)?;
    let mut ui_state = ui::UiState::default();
    let mut input_events = ui::input_event_stream();

    info!(
        app_url = %config.app_url,
        log_dir = %config.log_dir.display(),
        "Starting UI"
    );
    ui::terminal_enter(&mut ui_state)?;
    let res = run_loop(controller, &mut ui_state, &mut input_events, events_rx).await;
    ui::terminal_exit()?;
    res
}

async fn run_loop<C: ConfigProvider>(
    mut controller: AppController<C>,
    ui_state: &mut ui::UiState,
    input_events: &mut ui::InputEventReceiver,
    mut events_rx: mpsc::UnboundedReceiver<WorkerEvent>,
) -> Result<()> {
    let jobs = controller.startup_jobs();
    controller.dispatch(jobs);
    ui::draw(ui_state, &controller.snapshot()).wrap_err("initial draw failed")?;

    loop {
        tokio::select! {
            maybe_event = events_rx.recv() => {
                let Some(event) = maybe_event else {
                    warn!("worker channel closed");
                    break;
                };
                let jobs = controller.handle_worker_event(event);
                controller.dispatch(jobs);
            }
            _ = tokio::signal::ctrl_c() => {
                break;
            }
            raw_ev = ui::next_raw_event(input_events) => {
                let event = raw_ev?;
                let Some(ev) = ui::interpret_event(ui_state, event) else {
                    continue;
                };
                if matches!(ev, ui::UserEvent::Quit) {
                    break;
                }
                let jobs = controller.handle_user_event(ev);
                controller.dispatch(jobs);
            }
        }
        ui::draw(ui_state, &controller.snapshot()).wrap_err("draw failed")?;
    }
    controller.shutdown();
    info!("UI loop finished");
    Ok(())
}
