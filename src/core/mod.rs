/*!
 * Cross-cutting machinery shared by the facade and the multipart engine
 */

pub mod progress;
pub mod retry;
