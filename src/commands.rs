/// Command-line surface and dispatch onto the self-service operations
use chrono::{Datelike, NaiveDate};
use clap::Subcommand;
use color_eyre::{eyre::eyre, Result};
use serde::Serialize;
use serde_json::json;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::warn;

use crate::config::Config;
use crate::erp::session::Session;
use crate::ess::{
  total_remaining, EssService, HalfDay, NewExpense, NewLeaveRequest, WATCH_PERIOD,
};

#[derive(Subcommand, Debug)]
pub enum Command {
  /// Log in (password from ESS_PASSWORD) and remember the session
  Login {
    #[arg(short, long)]
    username: String,
    /// Database to log into (default: erp.database)
    #[arg(short, long)]
    database: Option<String>,
  },
  /// Forget the stored session
  Logout,
  /// Show who is logged in
  Whoami,
  /// Employee profile
  Profile,
  /// Company details
  Company,
  /// Profile, attendance, leave, announcements, events and planning at a glance
  Dashboard,
  /// Check in, check out and worked hours
  #[command(subcommand)]
  Attendance(AttendanceCommand),
  /// Leave balance and requests
  #[command(subcommand)]
  Leave(LeaveCommand),
  /// Payslips
  #[command(subcommand)]
  Payslip(PayslipCommand),
  /// Expense claims
  #[command(subcommand)]
  Expense(ExpenseCommand),
  /// Planning targets and project progress
  #[command(subcommand)]
  Planning(PlanningCommand),
  /// Company announcements
  Announcements {
    #[arg(short, long, default_value_t = 5)]
    limit: u32,
  },
  /// Upcoming calendar events
  Calendar {
    #[arg(short, long, default_value_t = 5)]
    limit: u32,
  },
}

#[derive(Subcommand, Debug)]
pub enum AttendanceCommand {
  /// Checked in, done for today, or neither
  Status,
  /// Past attendance records
  History {
    #[arg(short, long, default_value_t = 5)]
    limit: u32,
  },
  /// Hours per day this week
  Week,
  /// Start a new attendance record now
  CheckIn,
  /// Check out of the open record (or the one given)
  CheckOut {
    #[arg(long)]
    id: Option<i64>,
  },
  /// Print the current status on every refresh until interrupted
  Watch {
    #[arg(long, default_value_t = WATCH_PERIOD.as_secs())]
    interval_secs: u64,
  },
}

#[derive(Subcommand, Debug)]
pub enum LeaveCommand {
  /// Remaining days per leave type
  Balance,
  /// Leave requests, newest first
  List {
    /// draft, confirm, validate, refuse or all
    #[arg(short, long, default_value = "all")]
    status: String,
    #[arg(short, long, default_value_t = 5)]
    limit: u32,
  },
  /// Submit a leave request
  Request {
    /// Leave type id (see `leave balance`)
    #[arg(long = "type")]
    leave_type: i64,
    /// First day, YYYY-MM-DD
    #[arg(long)]
    from: NaiveDate,
    /// Last day, YYYY-MM-DD (default: same as --from)
    #[arg(long)]
    to: Option<NaiveDate>,
    /// Take only the morning or the afternoon of --from
    #[arg(long, value_enum)]
    half: Option<HalfDay>,
    #[arg(short, long)]
    description: String,
  },
}

#[derive(Subcommand, Debug)]
pub enum PayslipCommand {
  /// Recent payslips, newest first
  List {
    #[arg(short, long, default_value_t = 5)]
    limit: u32,
  },
  /// A payslip with its lines
  Show { id: i64 },
}

#[derive(Subcommand, Debug)]
pub enum ExpenseCommand {
  /// Recent expenses, newest first
  List {
    #[arg(short, long, default_value_t = 5)]
    limit: u32,
  },
  /// One expense with its analytic distribution
  Show {
    id: i64,
  },
  /// Products that can be claimed
  Products,
  /// Products already used on expenses
  Types,
  /// File a draft expense
  Create {
    #[arg(long)]
    name: String,
    #[arg(long)]
    amount: f64,
    #[arg(long)]
    product: Option<i64>,
    #[arg(long)]
    unit_amount: Option<f64>,
    #[arg(long)]
    quantity: Option<f64>,
    /// YYYY-MM-DD (default: today)
    #[arg(long)]
    date: Option<NaiveDate>,
    #[arg(long)]
    description: Option<String>,
    #[arg(long)]
    reference: Option<String>,
    /// own_account or company_account
    #[arg(long)]
    payment_mode: Option<String>,
  },
  /// Delete an expense
  Delete {
    id: i64,
  },
  /// Attach a receipt file
  Attach {
    id: i64,
    file: PathBuf,
    /// Content type (default: guessed from the extension)
    #[arg(long)]
    mime: Option<String>,
  },
}

#[derive(Subcommand, Debug)]
pub enum PlanningCommand {
  /// This year's planning periods with the share of target points achieved
  Progress {
    #[arg(short, long, default_value_t = 5)]
    limit: u32,
  },
  /// Planning periods, trend and project update lines for one month
  Updates {
    /// 1-12 (default: this month)
    #[arg(long)]
    month: Option<u32>,
    /// Default: this year
    #[arg(long)]
    year: Option<i32>,
  },
}

/// What `whoami` and `login` print. Never includes the password.
#[derive(Debug, Serialize)]
struct SessionView<'a> {
  uid: i64,
  database: &'a str,
  username: &'a str,
}

impl<'a> From<&'a Session> for SessionView<'a> {
  fn from(session: &'a Session) -> Self {
    Self {
      uid: session.user_id,
      database: &session.database,
      username: &session.username,
    }
  }
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
  println!("{}", serde_json::to_string_pretty(value)?);
  Ok(())
}

fn mime_for(path: &Path) -> &'static str {
  let extension = path
    .extension()
    .and_then(|e| e.to_str())
    .map(|e| e.to_ascii_lowercase());

  match extension.as_deref() {
    Some("pdf") => "application/pdf",
    Some("png") => "image/png",
    Some("jpg") | Some("jpeg") => "image/jpeg",
    Some("gif") => "image/gif",
    Some("webp") => "image/webp",
    Some("heic") => "image/heic",
    _ => "application/octet-stream",
  }
}

pub async fn run(command: Command, ess: &EssService) -> Result<()> {
  match command {
    Command::Login { username, database } => {
      let password = Config::get_password()?;
      let session = ess.login(&username, &password, database.as_deref()).await?;
      print_json(&SessionView::from(session.as_ref()))
    }
    Command::Logout => {
      ess.logout();
      Ok(())
    }
    Command::Whoami => {
      let session = ess
        .whoami()
        .ok_or_else(|| eyre!("Not logged in. Run `ess login` first."))?;
      print_json(&SessionView::from(session.as_ref()))
    }
    Command::Profile => print_json(&ess.profile().await?),
    Command::Company => print_json(&ess.company().await?),
    Command::Dashboard => {
      let (profile, attendance, week, balance, announcements, events, planning) =
        futures::try_join!(
          ess.profile(),
          ess.current_attendance(),
          ess.weekly_attendance(),
          ess.leave_balance(),
          ess.announcements(5),
          ess.calendar_events(3),
          ess.planning_progress(2),
        )?;
      print_json(&json!({
        "profile": profile,
        "attendance": attendance,
        "week": week,
        "leave_days_remaining": total_remaining(&balance),
        "leave_balance": balance,
        "announcements": announcements,
        "calendar_events": events,
        "planning_progress": planning,
      }))
    }
    Command::Attendance(command) => run_attendance(command, ess).await,
    Command::Leave(command) => run_leave(command, ess).await,
    Command::Payslip(command) => run_payslip(command, ess).await,
    Command::Expense(command) => run_expense(command, ess).await,
    Command::Planning(command) => run_planning(command, ess).await,
    Command::Announcements { limit } => print_json(&ess.announcements(limit).await?),
    Command::Calendar { limit } => print_json(&ess.calendar_events(limit).await?),
  }
}

async fn run_attendance(command: AttendanceCommand, ess: &EssService) -> Result<()> {
  match command {
    AttendanceCommand::Status => print_json(&ess.current_attendance().await?),
    AttendanceCommand::History { limit } => print_json(&ess.attendance_history(limit).await?),
    AttendanceCommand::Week => print_json(&ess.weekly_attendance().await?),
    AttendanceCommand::CheckIn => print_json(&json!({ "id": ess.check_in().await? })),
    AttendanceCommand::CheckOut { id } => {
      let done = match id {
        Some(id) => ess.check_out(id).await?,
        None => ess.check_out_active().await?,
      };
      print_json(&json!({ "checked_out": done }))
    }
    AttendanceCommand::Watch { interval_secs } => {
      if interval_secs == 0 {
        return Err(eyre!("--interval-secs must be at least 1"));
      }
      let mut watch = ess.watch_attendance(Duration::from_secs(interval_secs));
      loop {
        tokio::select! {
          _ = tokio::signal::ctrl_c() => break,
          next = watch.next() => match next {
            Some(Ok(current)) => print_json(&current)?,
            Some(Err(e)) => warn!(error = %e, "Attendance refresh failed"),
            None => break,
          },
        }
      }
      Ok(())
    }
  }
}

async fn run_leave(command: LeaveCommand, ess: &EssService) -> Result<()> {
  match command {
    LeaveCommand::Balance => print_json(&ess.leave_balance().await?),
    LeaveCommand::List { status, limit } => {
      print_json(&ess.leave_requests(Some(status.as_str()), limit).await?)
    }
    LeaveCommand::Request {
      leave_type,
      from,
      to,
      half,
      description,
    } => {
      let request = NewLeaveRequest {
        leave_type_id: leave_type,
        description,
        date_from: from,
        date_to: to.unwrap_or(from),
        half_day: half,
      };
      print_json(&json!({ "id": ess.request_leave(&request).await? }))
    }
  }
}

async fn run_payslip(command: PayslipCommand, ess: &EssService) -> Result<()> {
  match command {
    PayslipCommand::List { limit } => print_json(&ess.payslips(limit).await?),
    PayslipCommand::Show { id } => {
      let (payslip, lines) = futures::try_join!(ess.payslip(id), ess.payslip_lines(id))?;
      let payslip = payslip.ok_or_else(|| eyre!("Payslip {} not found", id))?;
      print_json(&json!({ "payslip": payslip, "lines": lines }))
    }
  }
}

async fn run_planning(command: PlanningCommand, ess: &EssService) -> Result<()> {
  match command {
    PlanningCommand::Progress { limit } => print_json(&ess.planning_progress(limit).await?),
    PlanningCommand::Updates { month, year } => {
      let today = ess.today();
      let month = month.unwrap_or_else(|| today.month());
      let year = year.unwrap_or_else(|| today.year());
      print_json(&ess.project_updates(month, year).await?)
    }
  }
}

async fn run_expense(command: ExpenseCommand, ess: &EssService) -> Result<()> {
  match command {
    ExpenseCommand::List { limit } => print_json(&ess.expenses(limit).await?),
    ExpenseCommand::Show { id } => {
      let expense = ess
        .expense(id)
        .await?
        .ok_or_else(|| eyre!("Expense {} not found", id))?;
      print_json(&expense)
    }
    ExpenseCommand::Products => print_json(&ess.expense_products().await?),
    ExpenseCommand::Types => print_json(&ess.expense_types().await?),
    ExpenseCommand::Create {
      name,
      amount,
      product,
      unit_amount,
      quantity,
      date,
      description,
      reference,
      payment_mode,
    } => {
      let expense = NewExpense {
        name,
        product_id: product,
        total_amount: amount,
        unit_amount,
        quantity,
        date,
        description,
        reference,
        payment_mode,
      };
      print_json(&json!({ "id": ess.create_expense(&expense).await? }))
    }
    ExpenseCommand::Delete { id } => {
      print_json(&json!({ "deleted": ess.delete_expense(id).await? }))
    }
    ExpenseCommand::Attach { id, file, mime } => {
      let content = std::fs::read(&file)
        .map_err(|e| eyre!("Failed to read {}: {}", file.display(), e))?;
      let file_name = file
        .file_name()
        .and_then(|n| n.to_str())
        .ok_or_else(|| eyre!("Not a file: {}", file.display()))?;
      let mime = mime.as_deref().unwrap_or_else(|| mime_for(&file));

      let attachment = ess.attach_receipt(id, &content, file_name, mime).await?;
      print_json(&json!({ "attachment_id": attachment }))
    }
  }
}
