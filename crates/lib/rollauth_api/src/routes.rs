//! Route paths.

pub const GET_API_HEALTH: &str = "/api/health";

pub const POST_AUTH_REGISTER: &str = "/api/auth/register";
pub const POST_AUTH_LOGIN: &str = "/api/auth/login";
pub const POST_AUTH_LOGOUT: &str = "/api/auth/logout";
pub const GET_AUTH_ME: &str = "/api/auth/me";
pub const POST_AUTH_TOKEN: &str = "/api/auth/token";
pub const POST_AUTH_PASSWORD: &str = "/api/auth/password";

pub const GET_AUTH_SESSIONS: &str = "/api/auth/sessions";
pub const DELETE_AUTH_SESSIONS_ID: &str = "/api/auth/sessions/{id}";
pub const POST_AUTH_SESSIONS_REVOKE_ALL: &str = "/api/auth/sessions/revoke-all";

pub const GET_AUTH_ACCOUNTS: &str = "/api/auth/accounts";
/// `GET` starts a flow, `DELETE` unlinks.
pub const OAUTH_PROVIDER: &str = "/api/auth/oauth/{provider}";
pub const GET_OAUTH_CALLBACK: &str = "/api/auth/oauth/{provider}/callback";

pub const GET_ADMIN_USERS: &str = "/api/admin/users";
pub const GET_ADMIN_USER_ACTIVITY: &str = "/api/admin/users/{id}/activity";
pub const POST_ADMIN_USER_STATUS: &str = "/api/admin/users/{id}/status";
