mod disk_tests;
mod geometry_tests;
mod image_tests;
