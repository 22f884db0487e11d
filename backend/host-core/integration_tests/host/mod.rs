mod calls;
mod challenge;
mod helpers;
mod lifecycle;
