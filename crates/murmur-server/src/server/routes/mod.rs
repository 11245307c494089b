// Route modules for Murmur Server
pub mod files; // Stored attachment downloads
pub mod websocket; // Chat WebSocket endpoint
