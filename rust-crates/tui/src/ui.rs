use crate::{
    client::{AccountStatus, AppSnapshot},
    wizard::{Step, WinnerPhase},
};
use color_eyre::eyre::{Result, eyre};
use crossterm::{
    event::{self, Event, KeyCode, KeyEvent, KeyEventKind, KeyModifiers},
    terminal::{disable_raw_mode, enable_raw_mode},
};
use ratatui::{prelude::*, widgets::*};
use std::io::stdout;
use tokio::sync::mpsc;

pub type InputEventReceiver = mpsc::UnboundedReceiver<std::io::Result<Event>>;

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum UserEvent {
    Quit,
    Redraw,
    ChannelInput(char),
    ChannelBackspace,
    ToggleGroup,
    /// Enter: advance or act on the current step.
    Confirm,
    DrawAgain,
    RetryProduct,
    StartOver,
    RefreshOrders,
    CheckAccount,
    SaveSettings {
        api_key: String,
        product: String,
    },
}

#[derive(Debug, Default)]
pub struct UiState {
    mode: Mode,
    step: Step,
    api_key: Option<String>,
    product_id: String,
    terminal: Option<Terminal<CrosstermBackend<std::io::Stdout>>>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
enum Mode {
    #[default]
    Normal,
    Settings(SettingsState),
    QuitModal,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
struct SettingsState {
    api_key: String,
    product: String,
    focus: SettingsField,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
enum SettingsField {
    #[default]
    ApiKey,
    Product,
}

impl SettingsState {
    fn field_mut(&mut self) -> &mut String {
        match self.focus {
            SettingsField::ApiKey => &mut self.api_key,
            SettingsField::Product => &mut self.product,
        }
    }

    fn switch_focus(&mut self) {
        self.focus = match self.focus {
            SettingsField::ApiKey => SettingsField::Product,
            SettingsField::Product => SettingsField::ApiKey,
        };
    }
}

pub fn terminal_enter(state: &mut UiState) -> Result<()> {
    enable_raw_mode()?;
    crossterm::execute!(
        std::io::stdout(),
        crossterm::terminal::EnterAlternateScreen,
        crossterm::event::EnableMouseCapture
    )?;
    let backend = CrosstermBackend::new(stdout());
    let terminal = Terminal::new(backend)?;
    state.terminal = Some(terminal);
    Ok(())
}

pub fn terminal_exit() -> Result<()> {
    disable_raw_mode()?;
    crossterm::execute!(
        std::io::stdout(),
        crossterm::event::DisableMouseCapture,
        crossterm::terminal::LeaveAlternateScreen
    )?;
    Ok(())
}

pub fn draw(state: &mut UiState, snap: &AppSnapshot) -> Result<()> {
    // cached for key interpretation between frames
    state.step = snap.step;
    state.api_key = snap.api_key.clone();
    state.product_id = snap.product_id.clone();
    if let Some(mut term) = state.terminal.take() {
        term.draw(|f| ui(f, state, snap))?;
        state.terminal = Some(term);
    }
    Ok(())
}

/// Blocking terminal reads moved onto a thread so the run loop can select on them.
pub fn input_event_stream() -> InputEventReceiver {
    let (tx, rx) = mpsc::unbounded_channel();
    std::thread::spawn(move || {
        loop {
            let ev = event::read();
            let failed = ev.is_err();
            if tx.send(ev).is_err() || failed {
                break;
            }
        }
    });
    rx
}

pub async fn next_raw_event(input_events: &mut InputEventReceiver) -> Result<Event> {
    match input_events.recv().await {
        Some(Ok(ev)) => Ok(ev),
        Some(Err(e)) => Err(eyre!(e).wrap_err("reading terminal input failed")),
        None => Err(eyre!("terminal input stream closed")),
    }
}

pub fn interpret_event(state: &mut UiState, event: Event) -> Option<UserEvent> {
    let k = match event {
        Event::Key(k) if k.kind == KeyEventKind::Press => k,
        Event::Resize(..) => return Some(UserEvent::Redraw),
        _ => return None,
    };
    // raw mode swallows SIGINT
    if k.modifiers.contains(KeyModifiers::CONTROL) && k.code == KeyCode::Char('c') {
        return Some(UserEvent::Quit);
    }
    match &mut state.mode {
        Mode::QuitModal => match k.code {
            KeyCode::Char('y') | KeyCode::Enter => Some(UserEvent::Quit),
            KeyCode::Char('n') | KeyCode::Esc => {
                state.mode = Mode::Normal;
                Some(UserEvent::Redraw)
            }
            _ => None,
        },
        Mode::Settings(ss) => match k.code {
            KeyCode::Esc => {
                state.mode = Mode::Normal;
                Some(UserEvent::Redraw)
            }
            KeyCode::Tab | KeyCode::Up | KeyCode::Down | KeyCode::BackTab => {
                ss.switch_focus();
                Some(UserEvent::Redraw)
            }
            KeyCode::Backspace => {
                ss.field_mut().pop();
                Some(UserEvent::Redraw)
            }
            KeyCode::Char(c) if !c.is_whitespace() => {
                ss.field_mut().push(c);
                Some(UserEvent::Redraw)
            }
            KeyCode::Enter => {
                let SettingsState {
                    api_key, product, ..
                } = ss.clone();
                state.mode = Mode::Normal;
                Some(UserEvent::SaveSettings { api_key, product })
            }
            _ => None,
        },
        Mode::Normal => interpret_normal(state, k),
    }
}

fn interpret_normal(state: &mut UiState, k: KeyEvent) -> Option<UserEvent> {
    match k.code {
        KeyCode::F(2) => {
            state.mode = Mode::Settings(SettingsState {
                api_key: state.api_key.clone().unwrap_or_default(),
                product: state.product_id.clone(),
                focus: SettingsField::ApiKey,
            });
            return Some(UserEvent::Redraw);
        }
        KeyCode::F(5) => return Some(UserEvent::CheckAccount),
        KeyCode::Esc => {
            state.mode = Mode::QuitModal;
            return Some(UserEvent::Redraw);
        }
        KeyCode::Enter => return Some(UserEvent::Confirm),
        _ => {}
    }
    if state.step == Step::Rules {
        return match k.code {
            KeyCode::Tab => Some(UserEvent::ToggleGroup),
            KeyCode::Backspace => Some(UserEvent::ChannelBackspace),
            KeyCode::Char(c) if !c.is_whitespace() => Some(UserEvent::ChannelInput(c)),
            _ => None,
        };
    }
    match (k.code, state.step) {
        (KeyCode::Char('q'), _) => {
            state.mode = Mode::QuitModal;
            Some(UserEvent::Redraw)
        }
        (KeyCode::Char('x'), _) => Some(UserEvent::StartOver),
        (KeyCode::Char('r'), Step::Winner) => Some(UserEvent::DrawAgain),
        (KeyCode::Char('r'), Step::Purchase) => Some(UserEvent::RetryProduct),
        (KeyCode::Char('o'), Step::Distribute) => Some(UserEvent::RefreshOrders),
        _ => None,
    }
}

fn ui(f: &mut Frame, state: &UiState, snap: &AppSnapshot) {
    f.render_widget(Clear, f.area());
    let chunks = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Length(3), // step header
            Constraint::Min(8),    // step body
            Constraint::Length(3), // bitrefill account
            Constraint::Length(6), // status/errors
            Constraint::Length(3), // help
        ])
        .split(f.area());

    draw_header(f, chunks[0], snap);
    match snap.step {
        Step::Rules => draw_rules(f, chunks[1], snap),
        Step::Winner => draw_winner(f, chunks[1], snap),
        Step::Purchase => draw_purchase(f, chunks[1], snap),
        Step::Distribute => draw_distribute(f, chunks[1], snap),
    }
    draw_account(f, chunks[2], snap);
    draw_status(f, chunks[3], snap);
    draw_help(f, chunks[4], snap);
    draw_modals(f, state);
}

fn draw_header(f: &mut Frame, area: Rect, snap: &AppSnapshot) {
    let steps = [Step::Rules, Step::Winner, Step::Purchase, Step::Distribute];
    let spans: Vec<Span> = steps
        .iter()
        .flat_map(|s| {
            let style = if *s == snap.step {
                Style::default().fg(Color::Yellow).add_modifier(Modifier::BOLD)
            } else {
                Style::default().fg(Color::DarkGray)
            };
            [
                Span::styled(format!("{}. {}", s.number(), s.title()), style),
                Span::raw("  "),
            ]
        })
        .collect();
    let widget = Paragraph::new(Line::from(spans))
        .block(Block::default().borders(Borders::ALL).title("Channel Gifter"));
    f.render_widget(widget, area);
}

fn draw_rules(f: &mut Frame, area: Rect, snap: &AppSnapshot) {
    let rules = &snap.rules;
    let lines = vec![
        Line::from(format!("Channel: /{}_", rules.channel_id)),
        Line::from(format!("Group:   {} (Tab to switch)", rules.group)),
        Line::from(format!("Mode:    {}", rules.mode.as_str())),
        Line::from(""),
        Line::from("Type the channel id and press Enter to pick a winner."),
    ];
    let widget = Paragraph::new(lines)
        .block(Block::default().borders(Borders::ALL).title("Rules"));
    f.render_widget(widget, area);
}

fn winner_label(snap: &AppSnapshot) -> Option<String> {
    if let Some(profile) = &snap.profile {
        return Some(profile.label());
    }
    let record = snap.winner.as_ref()?;
    Some(match snap.winner_fid {
        Some(fid) => format!("FID {fid}"),
        None => record.to_string(),
    })
}

fn draw_winner(f: &mut Frame, area: Rect, snap: &AppSnapshot) {
    let mut lines = vec![Line::from(format!(
        "Channel /{} {}: {} fetched",
        snap.rules.channel_id, snap.rules.group, snap.fetched
    ))];
    match &snap.phase {
        WinnerPhase::Idle => {}
        WinnerPhase::Fetching => lines.push(Line::from("Fetching...")),
        WinnerPhase::Resolving => lines.push(Line::from("Looking up winner details...")),
        WinnerPhase::Ready => {}
        WinnerPhase::Failed(e) => lines.push(Line::styled(
            format!("Fetch failed: {e}"),
            Style::default().fg(Color::Red),
        )),
    }
    if let Some(label) = winner_label(snap) {
        lines.push(Line::from(""));
        lines.push(Line::styled(
            format!("Winner: {label}"),
            Style::default().fg(Color::Green).add_modifier(Modifier::BOLD),
        ));
    }
    if let Some(profile) = &snap.profile {
        if let Some(name) = &profile.display_name {
            lines.push(Line::from(format!("Name: {name}")));
        }
        lines.push(Line::from(format!("FID: {}", profile.fid)));
    }
    if let Some(note) = &snap.note {
        lines.push(Line::styled(note.clone(), Style::default().fg(Color::Yellow)));
    }
    let widget = Paragraph::new(lines)
        .wrap(Wrap { trim: false })
        .block(Block::default().borders(Borders::ALL).title("Winner"));
    f.render_widget(widget, area);
}

fn draw_purchase(f: &mut Frame, area: Rect, snap: &AppSnapshot) {
    let purchase = &snap.purchase;
    let mut lines = Vec::new();
    if purchase.loading {
        lines.push(Line::from(format!("Loading {}...", snap.product_id)));
    }
    if let Some(product) = &purchase.product {
        let data = &product.data;
        lines.push(Line::from(format!("Product: {}", data.name)));
        if let Some(package) = data.packages.first() {
            lines.push(Line::from(format!(
                "Value: {} {}",
                package.value_label(),
                data.currency
            )));
            lines.push(Line::from(format!("Price: {}", package.display_price())));
        } else {
            lines.push(Line::from("No packages available"));
        }
        lines.push(Line::from(format!("Country: {}", data.country_name)));
        lines.push(Line::from(format!(
            "In stock: {}",
            if data.in_stock { "yes" } else { "no" }
        )));
    }
    if purchase.purchasing {
        lines.push(Line::from("Purchasing..."));
    }
    if let Some(e) = &purchase.error {
        lines.push(Line::styled(e.clone(), Style::default().fg(Color::Red)));
    }
    let widget = Paragraph::new(lines)
        .wrap(Wrap { trim: false })
        .block(Block::default().borders(Borders::ALL).title("Purchase Gift Card"));
    f.render_widget(widget, area);
}

fn draw_distribute(f: &mut Frame, area: Rect, snap: &AppSnapshot) {
    let mut lines = Vec::new();
    match &snap.invoice {
        Some(invoice) => {
            let data = &invoice.data;
            lines.push(Line::from(format!("Invoice {} ({})", data.id, data.status)));
            if let Some(payment) = &data.payment {
                lines.push(Line::from(format!(
                    "Paid {} {} via {}",
                    payment.price, payment.currency, payment.method
                )));
            }
            for order in &data.orders {
                let product = order
                    .product
                    .as_ref()
                    .map(|p| p.name.as_str())
                    .unwrap_or("?");
                lines.push(Line::from(format!(
                    "Order {}: {} [{}]",
                    order.id, product, order.status
                )));
                if let Some(info) = &order.redemption_info {
                    lines.push(Line::from(format!("  Redemption: {info}")));
                }
            }
            if let Some(label) = winner_label(snap) {
                lines.push(Line::from(""));
                lines.push(Line::from(format!("Send the gift card to {label}.")));
            }
        }
        None => lines.push(Line::from("No invoice")),
    }
    let widget = Paragraph::new(lines)
        .wrap(Wrap { trim: false })
        .block(Block::default().borders(Borders::ALL).title("Distribute"));
    f.render_widget(widget, area);
}

fn draw_account(f: &mut Frame, area: Rect, snap: &AppSnapshot) {
    let key = if snap.api_key.is_some() {
        "set"
    } else {
        "not set"
    };
    let ping = match &snap.account {
        AccountStatus::Unknown => String::from("unchecked"),
        AccountStatus::Checking => String::from("checking..."),
        AccountStatus::Reachable => String::from("ok"),
        AccountStatus::Failed(e) => format!("failed ({e})"),
    };
    let balance = snap
        .balance
        .as_ref()
        .map(|b| format!("{} {}", b.balance, b.currency))
        .unwrap_or_else(|| String::from("N/A"));
    let text = format!(
        "API key: {key} | Product: {} | Ping: {ping} | Balance: {balance}",
        snap.product_id
    );
    let widget =
        Paragraph::new(text).block(Block::default().borders(Borders::ALL).title("Bitrefill"));
    f.render_widget(widget, area);
}

fn draw_status(f: &mut Frame, area: Rect, snap: &AppSnapshot) {
    let status_widget = if snap.errors.is_empty() {
        let mut lines: Vec<Line> = Vec::new();
        if snap.status.trim().is_empty() {
            lines.push(Line::from("Ready"));
        } else {
            for line in snap.status.lines() {
                lines.push(Line::from(line.to_string()));
            }
        }
        Paragraph::new(lines)
            .wrap(Wrap { trim: false })
            .block(Block::default().borders(Borders::ALL).title("Status"))
            .style(Style::default().fg(Color::Green))
    } else {
        let lines: Vec<Line> = snap.errors.iter().map(|e| Line::from(e.clone())).collect();
        Paragraph::new(lines)
            .wrap(Wrap { trim: false })
            .block(Block::default().borders(Borders::ALL).title("Errors"))
            .style(Style::default().fg(Color::Red))
    };
    f.render_widget(status_widget, area);
}

fn help_text(snap: &AppSnapshot) -> &'static str {
    match snap.step {
        Step::Rules => "type channel | Tab group | Enter next | F2 settings | F5 ping | Esc quit",
        Step::Winner if snap.can_continue => {
            "r draw again | Enter continue | x start over | F2 settings | q/Esc quit"
        }
        Step::Winner => "x start over | F2 settings | q/Esc quit",
        Step::Purchase => {
            "Enter purchase | r retry | x start over | F2 settings | F5 balance | q/Esc quit"
        }
        Step::Distribute => "o/Enter refresh orders | x start over | F5 balance | q/Esc quit",
    }
}

fn draw_help(f: &mut Frame, area: Rect, snap: &AppSnapshot) {
    let help = Paragraph::new(help_text(snap))
        .block(Block::default().borders(Borders::ALL).title("Help"));
    f.render_widget(help, area);
}

/// Short keys are hidden entirely; longer ones keep their last four characters.
fn mask(secret: &str) -> String {
    let len = secret.chars().count();
    if len <= 4 {
        return "*".repeat(len);
    }
    secret
        .chars()
        .enumerate()
        .map(|(i, c)| if i < len - 4 { '*' } else { c })
        .collect()
}

fn draw_modals(f: &mut Frame, state: &UiState) {
    match &state.mode {
        Mode::Normal => {}
        Mode::Settings(ss) => {
            let area = centered_rect(60, 40, f.area());
            let block = Block::default().borders(Borders::ALL).title("Settings");
            let marker = |field: SettingsField| if ss.focus == field { ">" } else { " " };
            let p = Paragraph::new(vec![
                Line::from(format!(
                    "{} API key: {}",
                    marker(SettingsField::ApiKey),
                    mask(&ss.api_key)
                )),
                Line::from(format!(
                    "{} Product: {}",
                    marker(SettingsField::Product),
                    ss.product
                )),
                Line::from(""),
                Line::from("Tab switch field | Enter save | Esc cancel"),
            ]);
            f.render_widget(Clear, area);
            f.render_widget(block.clone(), area);
            f.render_widget(p, block.inner(area));
        }
        Mode::QuitModal => {
            let area = centered_rect(30, 20, f.area());
            let block = Block::default().borders(Borders::ALL).title("Quit");
            let p = Paragraph::new("Quit Channel Gifter? y/n");
            f.render_widget(Clear, area);
            f.render_widget(block.clone(), area);
            f.render_widget(p, block.inner(area));
        }
    }
}

fn centered_rect(w_percent: u16, h_percent: u16, r: Rect) -> Rect {
    let popup_layout = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Percentage((100 - h_percent) / 2),
            Constraint::Percentage(h_percent),
            Constraint::Percentage((100 - h_percent) / 2),
        ])
        .split(r);

    let vertical = Layout::default()
        .direction(Direction::Horizontal)
        .constraints([
            Constraint::Percentage((100 - w_percent) / 2),
            Constraint::Percentage(w_percent),
            Constraint::Percentage((100 - w_percent) / 2),
        ])
        .split(popup_layout[1]);

    vertical[1]
}
